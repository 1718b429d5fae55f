//! Concrete namespaces.
//!
//! The engine only depends on the [`FileSystem`](crate::FileSystem)
//! contract; these are the implementations shipped with the crate.

mod local;
mod memory;

pub use local::{LocalFs, LocalScanner};
pub use memory::{Fault, MemFs, MemFsBuilder, MemScanner};
