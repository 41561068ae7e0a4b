pub mod config;
pub mod error;
pub mod types;

pub use config::SealpipeConfig;
pub use error::{SealpipeError, SealpipeResult};
