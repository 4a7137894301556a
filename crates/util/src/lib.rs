//! Support utilities shared by the engine and CLI: snapshot persistence, configuration,
//! path helpers, and log-friendly text helpers.

pub mod config;
pub mod path_processing;
pub mod state_store;
pub mod text_processing;

pub use config::*;
pub use path_processing::*;
pub use state_store::*;
pub use text_processing::*;
