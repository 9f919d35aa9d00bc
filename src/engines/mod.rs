//! Cache engine implementations.

pub mod memory;

pub use memory::{Fetcher, MemoryEngine, MemoryEngineConfig};
