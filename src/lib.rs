pub mod config;
pub mod error;
pub mod ports;
pub mod procfile;

pub use config::{SetupOptions, SiteConfig};
pub use error::{BenchError, Result};
pub use ports::{ObservedPorts, PortAllocator, PortAssignment, PortName};
pub use procfile::ProcfileOptions;
