//! Plugins and their metadata.
//!
//! A plugin body receives an [`Instance`] bound to its own child context (or
//! to the enclosing context when it skips encapsulation) together with its
//! registration options, and signals completion by resolving its future.

use std::{fmt, future::Future, sync::Arc};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::{BootError, BoxError, Instance, TargetKind};

/// Decorators a plugin expects to find before its body runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequiredDecorators {
    /// Instance decorators
    pub instance: Vec<String>,
    /// Request decorators
    pub request: Vec<String>,
    /// Reply decorators
    pub reply: Vec<String>,
}

impl RequiredDecorators {
    /// Every requirement with its target kind, instance first.
    pub fn iter(&self) -> impl Iterator<Item = (TargetKind, &str)> {
        let instance = self.instance.iter().map(|name| (TargetKind::Instance, name.as_str()));
        let request = self.request.iter().map(|name| (TargetKind::Request, name.as_str()));
        let reply = self.reply.iter().map(|name| (TargetKind::Reply, name.as_str()));
        instance.chain(request).chain(reply)
    }
}

/// Static description of a plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginMeta {
    /// Name used for dependencies, logging and errors
    pub name: Option<String>,
    /// Run against the enclosing context instead of a fresh child context
    pub skip_override: bool,
    /// Plugins that must have loaded before this one
    pub dependencies: Vec<String>,
    /// Decorators that must resolve before this plugin runs
    pub decorators: RequiredDecorators,
}

impl PluginMeta {
    /// Metadata for a plugin called `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// The plugin name, or `anonymous`.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("anonymous")
    }
}

/// A unit of application setup.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Static description of the plugin.
    fn meta(&self) -> PluginMeta {
        PluginMeta::default()
    }

    /// Set the plugin up against `instance`. Resolving the future signals
    /// completion; an error aborts the boot.
    async fn register(&self, instance: Instance, options: Value) -> Result<(), BoxError>;
}

type Body = Arc<dyn Fn(Instance, Value) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// A plugin built from a closure. See [`plugin`].
#[derive(Clone)]
pub struct FnPlugin {
    meta: PluginMeta,
    body: Body,
}

/// Build a plugin from an async closure.
///
/// ```
/// use trellis::{App, Decorator, plugin};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
/// let app = App::default();
/// app.register(
///     plugin(|instance, _options| async move {
///         instance.decorate("greeting", Decorator::value("hello"))?;
///         Ok(())
///     })
///     .named("greeter"),
///     serde_json::Value::Null,
/// )?;
/// app.ready().await?;
/// # Ok(())
/// # }
/// ```
pub fn plugin<F, Fut>(body: F) -> FnPlugin
where
    F: Fn(Instance, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    FnPlugin {
        meta: PluginMeta::default(),
        body: Arc::new(move |instance, options| Box::pin(body(instance, options))),
    }
}

impl FnPlugin {
    /// Name the plugin.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.meta.name = Some(name.into());
        self
    }

    /// Share the enclosing context instead of creating a child context.
    pub fn skip_override(mut self) -> Self {
        self.meta.skip_override = true;
        self
    }

    /// Require plugin `name` to load first.
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.meta.dependencies.push(name.into());
        self
    }

    /// Require an instance decorator.
    pub fn requires_decorator(mut self, name: impl Into<String>) -> Self {
        self.meta.decorators.instance.push(name.into());
        self
    }

    /// Require a request decorator.
    pub fn requires_request_decorator(mut self, name: impl Into<String>) -> Self {
        self.meta.decorators.request.push(name.into());
        self
    }

    /// Require a reply decorator.
    pub fn requires_reply_decorator(mut self, name: impl Into<String>) -> Self {
        self.meta.decorators.reply.push(name.into());
        self
    }

    /// Replace the metadata wholesale.
    pub fn with_meta(mut self, meta: PluginMeta) -> Self {
        self.meta = meta;
        self
    }
}

impl fmt::Debug for FnPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnPlugin").field("meta", &self.meta).finish()
    }
}

#[async_trait]
impl Plugin for FnPlugin {
    fn meta(&self) -> PluginMeta {
        self.meta.clone()
    }

    async fn register(&self, instance: Instance, options: Value) -> Result<(), BoxError> {
        (self.body)(instance, options).await
    }
}

/// A post-bootstrap hook: receives the failure of the plugin it follows (if
/// any) and the registering instance. Returning `Ok` recovers the failure.
pub(crate) type Hook =
    Arc<dyn Fn(Option<BootError>, Instance) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// A teardown hook.
pub(crate) type CloseHook =
    Arc<dyn Fn(Instance) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

pub(crate) fn hook<F, Fut>(hook: F) -> Hook
where
    F: Fn(Option<BootError>, Instance) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(move |error, instance| Box::pin(hook(error, instance)))
}

pub(crate) fn close_hook<F, Fut>(hook: F) -> CloseHook
where
    F: Fn(Instance) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(move |instance| Box::pin(hook(instance)))
}
