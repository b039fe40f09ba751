//! Process configuration and logging shared by the server binaries.

pub mod config;
pub mod logging;
