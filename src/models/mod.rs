//! Domain model module declarations.

pub mod progress;
pub mod task;
