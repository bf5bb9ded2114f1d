//! Run registry and history storage.
//!
//! Provides:
//! - `RunRegistry` - Orchestrates runs and enforces one in-flight run per
//!   probe path
//! - `RunStore` trait + `MemoryStore` - Run history bookkeeping

pub mod registry;
pub mod store;

pub use registry::{CompletedRun, RegistryError, RunRegistry};
pub use store::{MemoryStore, RunFilter, RunId, RunRecord, RunStore, StoreError};
