//! Middleware system for the message dispatch pipeline

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use super::session::Session;

/// Identifies a registered middleware so it can be removed later
pub type MiddlewareId = u64;

/// What a middleware decided for the current session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiddlewareOutcome {
    /// Pass control to the next middleware
    Next,
    /// Stop dispatch without replying
    Stop,
    /// Send this content as a reply and stop dispatch
    Reply(String),
}

impl MiddlewareOutcome {
    pub fn is_final(&self) -> bool {
        !matches!(self, MiddlewareOutcome::Next)
    }
}

impl From<bool> for MiddlewareOutcome {
    fn from(stop: bool) -> Self {
        if stop {
            MiddlewareOutcome::Stop
        } else {
            MiddlewareOutcome::Next
        }
    }
}

impl From<Option<String>> for MiddlewareOutcome {
    fn from(reply: Option<String>) -> Self {
        match reply {
            Some(content) => MiddlewareOutcome::Reply(content),
            None => MiddlewareOutcome::Next,
        }
    }
}

/// Middleware trait - interceptors invoked in order for every inbound message
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, session: &Session) -> MiddlewareOutcome;
}

/// Adapter turning an async closure into a middleware
pub struct FnMiddleware<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(Session) -> Fut + Send + Sync,
    Fut: Future<Output = MiddlewareOutcome> + Send,
{
    async fn handle(&self, session: &Session) -> MiddlewareOutcome {
        (self.f)(session.clone()).await
    }
}

/// Wrap an async closure as a shareable middleware
pub fn middleware_fn<F, Fut>(f: F) -> Arc<dyn Middleware>
where
    F: Fn(Session) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MiddlewareOutcome> + Send + 'static,
{
    Arc::new(FnMiddleware { f })
}
