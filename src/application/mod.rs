//! Application layer - Use cases and business logic
//!
//! This layer contains:
//! - Argv: Command line tokenizing, signatures and type domains
//! - Errors: Domain-specific errors
//! - Events: The application event bus
//! - Messaging: Sessions, middleware, dispatching
//! - Services: Worker orchestration

pub mod argv;
pub mod errors;
pub mod events;
pub mod messaging;
pub mod services;
