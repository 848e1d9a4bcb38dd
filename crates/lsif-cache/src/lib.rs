pub mod resident;
pub mod weighted;

pub use resident::*;
pub use weighted::*;

// Re-export common types for convenience
pub use lsif_core::{LsifError, Result};
