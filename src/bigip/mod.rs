//! BIG-IP product clients.

pub mod extension;

pub use extension::{PackageClient, PackageStatus};
