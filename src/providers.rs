//! Command builders for store provider CLIs.
//!
//! A command builder maps `(item_id, install_path)` to a
//! [`ProcessInvocation`]. Builders are registered per provider ID on a
//! [`TaskStore`](crate::orchestrator::store::TaskStore); the scheduler only
//! ever calls them.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{ProviderConfig, ProvidersConfig};

/// Provider ID for the Epic Games Store (`legendary`).
pub const EPIC: &str = "epic";
/// Provider ID for GOG (`gogdl`).
pub const GOG: &str = "gog";
/// Provider ID for Amazon Games (`nile`).
pub const AMAZON: &str = "amazon";

/// A program to run with its arguments and environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInvocation {
    /// Program path or name resolved through `PATH`.
    pub program: PathBuf,
    /// Arguments, in order.
    pub args: Vec<String>,
    /// Extra environment variables layered over the inherited environment.
    pub env: Vec<(String, String)>,
    /// Working directory; inherited when `None`.
    pub current_dir: Option<PathBuf>,
}

impl ProcessInvocation {
    /// Invocation of `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the child's working directory.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

impl fmt::Display for ProcessInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Builds the install process for one item.
pub type CommandBuilder = Arc<dyn Fn(&str, &Path) -> ProcessInvocation + Send + Sync>;

/// Wrap a closure as a [`CommandBuilder`].
#[must_use]
pub fn command_builder<F>(f: F) -> CommandBuilder
where
    F: Fn(&str, &Path) -> ProcessInvocation + Send + Sync + 'static,
{
    Arc::new(f)
}

/// `legendary install <item> --base-path <path> -y`
#[must_use]
pub fn legendary_builder(config: &ProviderConfig) -> CommandBuilder {
    let config = config.clone();
    command_builder(move |item_id, install_path| {
        let invocation = ProcessInvocation::new(&config.binary)
            .arg("install")
            .arg(item_id)
            .arg("--base-path")
            .arg(install_path.to_string_lossy())
            .arg("-y");
        finish(invocation, &config, "LEGENDARY_CONFIG_PATH")
    })
}

/// `gogdl download <item> --path <path>`
#[must_use]
pub fn gogdl_builder(config: &ProviderConfig) -> CommandBuilder {
    let config = config.clone();
    command_builder(move |item_id, install_path| {
        let invocation = ProcessInvocation::new(&config.binary)
            .arg("download")
            .arg(item_id)
            .arg("--path")
            .arg(install_path.to_string_lossy());
        finish(invocation, &config, "GOGDL_CONFIG_PATH")
    })
}

/// `nile install <item> --path <path>`
#[must_use]
pub fn nile_builder(config: &ProviderConfig) -> CommandBuilder {
    let config = config.clone();
    command_builder(move |item_id, install_path| {
        let invocation = ProcessInvocation::new(&config.binary)
            .arg("install")
            .arg(item_id)
            .arg("--path")
            .arg(install_path.to_string_lossy());
        finish(invocation, &config, "NILE_CONFIG_PATH")
    })
}

fn finish(
    invocation: ProcessInvocation,
    config: &ProviderConfig,
    env_key: &str,
) -> ProcessInvocation {
    let invocation = invocation.args(config.extra_args.iter().cloned());
    if let Some(path) = &config.config_path {
        invocation.env(env_key, path.to_string_lossy())
    } else {
        invocation
    }
}

/// Builders for every enabled built-in provider, keyed by provider ID.
#[must_use]
pub fn builtin_builders(config: &ProvidersConfig) -> HashMap<String, CommandBuilder> {
    let mut builders = HashMap::new();
    if config.epic.enabled {
        builders.insert(EPIC.to_owned(), legendary_builder(&config.epic));
    }
    if config.gog.enabled {
        builders.insert(GOG.to_owned(), gogdl_builder(&config.gog));
    }
    if config.amazon.enabled {
        builders.insert(AMAZON.to_owned(), nile_builder(&config.amazon));
    }
    builders
}
