// resload library
// Packaged-content loading and caching engine

pub mod cli;
pub mod config;
pub mod logging;
pub mod propfile;
pub mod resource;

pub use cli::Cli;
pub use config::{EngineConfig, LoadMode};
pub use logging::LogLevel;
pub use resource::Engine;
