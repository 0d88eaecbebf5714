//! Configuration loading and shared configuration types for the migration services.

pub mod environment;
pub mod load;
pub mod shared;

pub use load::{Config, LoadConfigError, load_config};
