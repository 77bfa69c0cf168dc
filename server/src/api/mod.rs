//! API surface: REST handlers and WebSocket endpoints

pub mod http;
pub mod ws;
