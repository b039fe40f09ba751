//! Bundled [`Adapter`](crate::adapter::Adapter) implementations.

pub mod memory;

pub use memory::MemoryAdapter;
