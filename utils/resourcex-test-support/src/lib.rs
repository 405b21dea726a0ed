//! Test fixtures for the resourcex crates: fluent resource construction and
//! ephemeral wire servers.

pub mod registry;
pub mod resource_builder;

pub use registry::{TestRegistry, WellKnownServer};
pub use resource_builder::ResourceBuilder;
