//! Services

pub mod dispatcher;
pub mod executor;
pub mod generator;
pub mod settings;
pub mod telegram;
