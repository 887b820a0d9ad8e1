pub mod web_api;
pub mod websocket;

pub use web_api::{WebApiConfig, WebApiServer};
pub use websocket::{WebSocketConfig, WebSocketServer};
