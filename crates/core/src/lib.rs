// Quern Core - Dispatch and lifecycle logic, storage behind ports
// No infrastructure dependencies in this crate

pub mod application;
pub mod domain;
pub mod error;
pub mod port;

pub use error::{Error, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
