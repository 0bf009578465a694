pub mod error;
pub mod filename;

pub use filename::UsedNames;
