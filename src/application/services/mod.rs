//! Application services - Business logic orchestration

pub mod worker_service;

pub use worker_service::{WorkerService, INTERRUPT_EXIT_CODE};
