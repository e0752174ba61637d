//! HTTP surface: status API and the bridge WebSocket route

pub mod routes;

pub use routes::build_router;
