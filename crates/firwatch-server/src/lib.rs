pub mod config;
pub mod jobs;
mod server;

pub use config::*;
pub use jobs::*;
pub use server::{ServerError, build_api_router, build_router, serve};
