pub mod config;
pub mod disease;
pub mod error;
pub mod model;
pub mod routes;
pub mod upload;
pub mod utils;

pub use routes::{router, AppState, SharedState};
