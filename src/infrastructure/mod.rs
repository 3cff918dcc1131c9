//! Infrastructure layer - External concerns
//!
//! This layer contains:
//! - Config: Configuration loading
//! - Storage: Persisted plugin sets
//! - Adapters: Bot connections
//! - Plugins: Module loading and the plugin registry
//! - Supervisor: Parent/worker process model

pub mod adapters;
pub mod config;
pub mod plugins;
pub mod storage;
pub mod supervisor;
