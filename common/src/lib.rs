// Meridian common library - main library exports

pub mod hash;
pub mod types;

// Flattened re-exports
pub use self::hash::{BlockHash, Hash};
pub use self::types::*;
