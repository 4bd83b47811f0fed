pub mod cli;
pub mod config;
pub mod model;

pub use config::Configuration;
