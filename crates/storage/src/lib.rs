//! Durable bot state and the single-instance guard.

pub mod lock;
pub mod state;

pub use lock::InstanceLock;
pub use state::{BotState, JsonFileStore, MemoryStore, StateStore, StoreError};
