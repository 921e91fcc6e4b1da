pub mod handlers;
pub mod server;
pub mod websocket;

pub use handlers::{HealthResponse, StatusResponse};
pub use server::{ApiServer, AppState};
