//! Provider process plumbing: spawning, output framing, and line readers.

pub mod codec;
pub mod reader;
pub mod spawner;
