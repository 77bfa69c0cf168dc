//! WebSocket endpoints

pub mod agent;
pub mod ui;
