//! BIG-IQ product clients.

pub mod licensing;

pub use licensing::AssignmentClient;
