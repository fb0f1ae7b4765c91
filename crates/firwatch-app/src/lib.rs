pub mod cli;
pub mod config;
pub mod districts;
pub mod error;
pub mod paths;
pub mod pipeline;
pub mod portal;
pub mod server;
pub mod services;
