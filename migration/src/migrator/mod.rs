//! Resource migrators performing the actual migration of one descriptor.

pub mod base;
pub mod memory;

pub use base::ResourceMigrator;
