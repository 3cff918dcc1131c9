//! Message handling - sessions, middleware and dispatch

pub mod dispatcher;
pub mod middleware;
pub mod prompt;
pub mod session;

pub use dispatcher::{BeforeAttachHook, Dispatcher, DispatcherConfig};
pub use middleware::{middleware_fn, FnMiddleware, Middleware, MiddlewareId, MiddlewareOutcome};
pub use prompt::{PromptAnswer, PromptKind, PromptOptions, Validate, ValidateFn};
pub use session::Session;
