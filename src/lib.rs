//! Tokio runtime for call sessions built on `callcore`.

pub use callcore::{self, types};

mod conference;
pub mod config;
pub mod error;
pub mod ports;
pub mod registry;
pub mod session;
pub mod sim;
pub mod tone;

pub use config::{CallRegistryConfig, CallSessionConfig};
pub use error::CallError;
pub use ports::CallBackends;
pub use registry::CallRegistry;
pub use session::{CallOptions, CallSession};
