pub mod auth;
pub mod config;
pub mod errors;
pub mod logging;

pub use auth::*;
pub use config::*;
pub use errors::*;
pub use logging::*;
