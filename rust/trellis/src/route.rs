use std::{collections::HashMap, fmt, future::Future, sync::Arc};

use futures::future::BoxFuture;

use crate::{BoxError, ContextId, RegisterError, Reply, Request};

/// A route handler: receives the materialized request and reply, and hands
/// the reply back once it is done with it.
pub type Handler =
    Arc<dyn Fn(Request, Reply) -> BoxFuture<'static, Result<Reply, BoxError>> + Send + Sync>;

/// Wrap an async closure as a [`Handler`].
pub fn handler<F, Fut>(handler: F) -> Handler
where
    F: Fn(Request, Reply) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Reply, BoxError>> + Send + 'static,
{
    Arc::new(move |request, reply| Box::pin(handler(request, reply)))
}

/// A handler bound to the context that declared it.
#[derive(Clone)]
pub(crate) struct Route {
    pub(crate) context: ContextId,
    pub(crate) handler: Handler,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// Exact-path route table.
#[derive(Debug, Default)]
pub(crate) struct Routes {
    routes: HashMap<String, Route>,
}

impl Routes {
    pub(crate) fn insert(&mut self, path: &str, route: Route) -> Result<(), RegisterError> {
        if self.routes.contains_key(path) {
            return Err(RegisterError::DuplicateRoute { path: path.into() });
        }
        self.routes.insert(path.into(), route);
        Ok(())
    }

    pub(crate) fn get(&self, path: &str) -> Option<Route> {
        self.routes.get(path).cloned()
    }
}
