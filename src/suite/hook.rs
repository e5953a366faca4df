//! User callbacks

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::state::RunContext;

type HookFn = dyn Fn(Arc<RunContext>) -> BoxFuture<'static, Result<(), String>> + Send + Sync;

/// A named async callback receiving the run context
#[derive(Clone)]
pub struct Hook {
    name: String,
    f: Arc<HookFn>,
}

impl Hook {
    /// Wrap an async closure; its error is reported through `Display`
    pub fn new<F, Fut, E>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arc<RunContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display + 'static,
    {
        Self {
            name: name.into(),
            f: Arc::new(move |ctx| f(ctx).map(|r| r.map_err(|e| e.to_string())).boxed()),
        }
    }

    /// Name used in logs and the report
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn call(&self, ctx: Arc<RunContext>) -> BoxFuture<'static, Result<(), String>> {
        (self.f)(ctx)
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hook").field(&self.name).finish()
    }
}
