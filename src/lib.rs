pub mod config;
pub mod error;
pub mod issuance;
pub mod observability;
