//! Pool module - registry of lazily-built kernels.

mod entry;
mod kernel;
mod registry;

pub use entry::*;
pub use kernel::*;
pub use registry::*;
