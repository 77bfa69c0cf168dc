//! Infrastructure: in-memory registries and the event hub

pub mod agent_registry;
pub mod command_store;
pub mod events;
