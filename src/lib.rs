pub mod configuration;
pub mod container_management;
pub mod controller;
pub mod error_handling;
pub mod executor;
pub mod languages;
pub mod port_allocator;
pub mod preview;
pub mod reaper;
pub mod registry;
pub mod teardown;

pub use controller::Controller;
