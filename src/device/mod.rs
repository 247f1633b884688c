pub mod btle;
pub mod connection;
pub mod constants;
pub mod scanner;
pub mod types;
