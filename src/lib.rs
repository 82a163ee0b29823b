pub mod config;
pub mod error;
pub mod ipn;
pub mod psp;
