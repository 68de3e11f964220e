//! Routes each update to the handlers registered for its type.
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::handlers::{Handler, UpdateContext};
use crate::model::UpdateType;

pub struct UpdateProcessor {
    handlers: HashMap<UpdateType, Vec<Arc<dyn Handler>>>,
}

impl Default for UpdateProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateProcessor {
    pub fn new() -> Self {
        let handlers = UpdateType::ROUTABLE
            .iter()
            .map(|t| (*t, Vec::new()))
            .collect();
        Self { handlers }
    }

    /// Registers by type name. Returns false (and logs) for unknown names.
    pub fn register_handler(&mut self, type_name: &str, handler: Arc<dyn Handler>) -> bool {
        match UpdateType::parse_type(type_name) {
            Some(t) => {
                self.register(t, handler);
                true
            }
            None => {
                warn!(type_name, "unknown update type, handler not registered");
                false
            }
        }
    }

    pub fn register(&mut self, update_type: UpdateType, handler: Arc<dyn Handler>) {
        debug!(update_type = update_type.as_str(), handler = handler.name(), "handler registered");
        self.handlers.entry(update_type).or_default().push(handler);
    }

    pub fn handler_count(&self, update_type: UpdateType) -> usize {
        self.handlers.get(&update_type).map_or(0, Vec::len)
    }

    /// Runs every handler for the update's route. Returns false only when the
    /// route is unknown.
    pub async fn process_update(&self, ctx: &UpdateContext) -> bool {
        self.dispatch(ctx).await.known
    }

    /// Like [`process_update`](Self::process_update), also reporting which
    /// handlers failed.
    pub async fn dispatch(&self, ctx: &UpdateContext) -> Dispatch {
        let mut route = ctx.route;
        if route == UpdateType::Command && self.handler_count(UpdateType::Command) == 0 {
            route = UpdateType::Message;
        }
        let Some(handlers) = self.handlers.get(&route) else {
            warn!(update_type = route.as_str(), "no handlers for update type");
            return Dispatch::default();
        };

        let mut outcome = Dispatch {
            known: true,
            ..Default::default()
        };
        for handler in handlers {
            match handler.handle(ctx).await {
                Ok(handled) => {
                    debug!(handler = handler.name(), handled, "handler finished");
                    outcome.handled |= handled;
                }
                Err(err) => {
                    error!(handler = handler.name(), ?err, "handler error");
                    outcome
                        .errors
                        .push(format!("{}: {err:#}", handler.name()));
                }
            }
        }
        outcome
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub known: bool,
    /// Some handler reported the update as handled.
    pub handled: bool,
    pub errors: Vec<String>,
}

struct FnHandler<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(UpdateContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, ctx: &UpdateContext) -> Result<bool> {
        (self.f)(ctx.clone()).await
    }
}

/// Wraps an async closure as a [`Handler`].
pub fn handler_fn<F, Fut>(name: &str, f: F) -> Arc<dyn Handler>
where
    F: Fn(UpdateContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool>> + Send + 'static,
{
    Arc::new(FnHandler {
        name: name.to_string(),
        f,
    })
}
