pub mod catalog;
pub mod config;
pub mod executor;
pub mod fetcher;
pub mod harvest;
pub mod model;
pub mod probes;
pub mod store;
pub mod traits;

// Re-export common types for convenience
pub use executor::*;
pub use model::*;
pub use traits::*;
