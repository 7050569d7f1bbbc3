pub mod cloud_init;
pub mod config;
pub mod error;
pub mod hypervisor;
pub mod inventory;
pub mod model;
pub mod orchestrator;

pub use error::Error;
