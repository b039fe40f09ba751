//! Identity provider implementations.

pub mod github;

pub use github::{GitHub, GitHubUrls};
