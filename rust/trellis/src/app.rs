//! The application and the instance handle plugins work against.
//!
//! An [`App`] owns one registry, one boot scheduler, one route table and the
//! close hooks. An [`Instance`] is a cheap handle bound to one context of
//! the application's tree: decorating through it declares on that context,
//! registering through it queues a plugin whose context is a child of it
//! (or the same context for plugins that skip encapsulation).

use std::{any::Any, fmt, future::Future, ops::Deref, sync::Arc};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::{
    BootError, BoxError, CloseError, ContextId, DecorateError, Decorator, InjectError, Lifecycle,
    LifecycleError, Options, Payload, Phase, Plugin, RegisterError, Registry, Reply, Request, Target, Template,
    boot::{Boot, Job, JobId, Pending, ScopeId, run_scope},
    plugin::{CloseHook, close_hook, hook},
    route::{Handler, Route, Routes},
};

tokio::task_local! {
    /// The application whose boot the current task is driving.
    static BOOTING: usize;
}

pub(crate) struct Shared {
    pub(crate) options: Options,
    pub(crate) registry: Registry,
    pub(crate) boot: Mutex<Boot>,
    routes: RwLock<Routes>,
    close_hooks: Mutex<Vec<(ContextId, ScopeId, CloseHook)>>,
    outcome: OnceCell<Result<(), BootError>>,
}

/// A handle on one context of an application.
///
/// Instances are what plugin bodies and hooks receive. Cloning is cheap and
/// every clone refers to the same context.
#[derive(Clone)]
pub struct Instance {
    shared: Arc<Shared>,
    context: ContextId,
    scope: ScopeId,
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("context", &self.context)
            .field("phase", &self.phase())
            .finish()
    }
}

impl Instance {
    pub(crate) fn new(shared: Arc<Shared>, context: ContextId, scope: ScopeId) -> Self {
        Self {
            shared,
            context,
            scope,
        }
    }

    /// The context this instance is bound to.
    pub fn context(&self) -> ContextId {
        self.context
    }

    /// The current lifecycle phase of the application.
    pub fn phase(&self) -> Phase {
        self.shared.registry.lifecycle().phase()
    }

    /// The application settings.
    pub fn options(&self) -> &Options {
        &self.shared.options
    }

    /// The decoration registry of the application.
    pub fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    fn declare<T: Target>(
        &self,
        name: &str,
        decorator: Decorator<T>,
        dependencies: Vec<String>,
    ) -> Result<(), DecorateError> {
        self.shared
            .registry
            .decorate::<T>(self.context, name, decorator, dependencies)
    }

    /// Declare an instance decorator on this context.
    pub fn decorate(
        &self,
        name: &str,
        decorator: impl Into<Decorator<Instance>>,
    ) -> Result<(), DecorateError> {
        self.declare(name, decorator.into(), vec![])
    }

    /// Declare an instance decorator whose `dependencies` must already
    /// resolve as instance decorators from this context.
    pub fn decorate_with_dependencies<I, S>(
        &self,
        name: &str,
        decorator: impl Into<Decorator<Instance>>,
        dependencies: I,
    ) -> Result<(), DecorateError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.declare(name, decorator.into(), collect(dependencies))
    }

    /// Whether an instance decorator named `name` is visible from here.
    pub fn has_decorator(&self, name: &str) -> bool {
        self.shared.registry.contains::<Instance>(self.context, name)
    }

    /// Declare a request decorator on this context.
    pub fn decorate_request(
        &self,
        name: &str,
        decorator: impl Into<Decorator<Request>>,
    ) -> Result<(), DecorateError> {
        self.declare(name, decorator.into(), vec![])
    }

    /// Declare a request decorator with dependencies on other request
    /// decorators.
    pub fn decorate_request_with_dependencies<I, S>(
        &self,
        name: &str,
        decorator: impl Into<Decorator<Request>>,
        dependencies: I,
    ) -> Result<(), DecorateError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.declare(name, decorator.into(), collect(dependencies))
    }

    /// Whether a request decorator named `name` is visible from here.
    pub fn has_request_decorator(&self, name: &str) -> bool {
        self.shared.registry.contains::<Request>(self.context, name)
    }

    /// Declare a reply decorator on this context.
    pub fn decorate_reply(
        &self,
        name: &str,
        decorator: impl Into<Decorator<Reply>>,
    ) -> Result<(), DecorateError> {
        self.declare(name, decorator.into(), vec![])
    }

    /// Declare a reply decorator with dependencies on other reply
    /// decorators.
    pub fn decorate_reply_with_dependencies<I, S>(
        &self,
        name: &str,
        decorator: impl Into<Decorator<Reply>>,
        dependencies: I,
    ) -> Result<(), DecorateError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.declare(name, decorator.into(), collect(dependencies))
    }

    /// Whether a reply decorator named `name` is visible from here.
    pub fn has_reply_decorator(&self, name: &str) -> bool {
        self.shared.registry.contains::<Reply>(self.context, name)
    }

    /// Read the instance property `name`. Values are aliased; accessors are
    /// evaluated against this instance.
    pub fn payload(&self, name: &str) -> Option<Payload> {
        let decoration = self.shared.registry.resolve::<Instance>(self.context, name)?;
        Some(decoration.decorator().read(self))
    }

    /// Read the instance property `name` as a `T`.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.payload(name)?.downcast::<T>()
    }

    /// Write the instance property `name` through its setter. Values and
    /// getter-only accessors are read only.
    pub fn set(&self, name: &str, value: Payload) -> Result<(), DecorateError> {
        let written = match self.shared.registry.resolve::<Instance>(self.context, name) {
            Some(decoration) => match decoration.decorator() {
                Decorator::Accessor(accessor) => accessor.set(self, value),
                Decorator::Value(_) => false,
            },
            None => false,
        };
        if written {
            Ok(())
        } else {
            Err(DecorateError::ReadOnly { name: name.into() })
        }
    }

    /// Every instance property visible from here, nearest first.
    pub fn names(&self) -> Vec<String> {
        self.shared.registry.names::<Instance>(self.context)
    }

    /// Queue `plugin` for loading once the current plugin body (or, at the
    /// root, the application boot) has finished.
    pub fn register(
        &self,
        plugin: impl Plugin,
        options: Value,
    ) -> Result<Registration, RegisterError> {
        let meta = plugin.meta();
        let what = meta.display_name().to_owned();
        if !self.shared.registry.lifecycle().is_constructing() {
            return Err(RegisterError::AfterStart { what });
        }

        let mut boot = self.shared.boot.lock();
        boot.ensure_open(self.scope, &what)?;

        let context = if meta.skip_override {
            self.context
        } else {
            self.shared.registry.create_context(self.context)
        };
        let scope = boot.open_scope(context);
        let job = boot.next_job();
        boot.enqueue(
            self.scope,
            Job::Plugin(Pending {
                id: job,
                plugin: Arc::new(plugin),
                meta,
                options,
                context,
                scope,
                hooks: vec![],
            }),
        );

        Ok(Registration {
            instance: self.clone(),
            job,
        })
    }

    /// Queue a standalone hook that runs once everything registered before
    /// it from this instance has loaded.
    pub fn after<F, Fut>(&self, after: F) -> Result<(), RegisterError>
    where
        F: Fn(Option<BootError>, Instance) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let what = "after hook";
        if !self.shared.registry.lifecycle().is_constructing() {
            return Err(RegisterError::AfterStart { what: what.into() });
        }

        let mut boot = self.shared.boot.lock();
        boot.ensure_open(self.scope, what)?;
        boot.enqueue(self.scope, Job::Hook(hook(after)));
        Ok(())
    }

    /// Declare a route owned by this context. Requests served through it
    /// see the request and reply decorators of this context's chain.
    pub fn route(&self, path: &str, handler: Handler) -> Result<(), RegisterError> {
        if !self.shared.registry.lifecycle().is_constructing() {
            return Err(RegisterError::AfterStart { what: path.into() });
        }
        self.shared.routes.write().insert(
            path,
            Route {
                context: self.context,
                handler,
            },
        )
    }

    /// Register a teardown hook. Hooks run in reverse registration order
    /// when the application closes.
    pub fn on_close<F, Fut>(&self, on_close: F) -> Result<(), RegisterError>
    where
        F: Fn(Instance) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        if self.phase() >= Phase::Closing {
            return Err(RegisterError::AfterStart {
                what: "close hook".into(),
            });
        }
        self.shared
            .close_hooks
            .lock()
            .push((self.context, self.scope, close_hook(on_close)));
        Ok(())
    }
}

fn collect<I, S>(dependencies: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    dependencies.into_iter().map(Into::into).collect()
}

/// A queued plugin. Hooks attached with [`Registration::after`] run right
/// after the plugin and everything it registered have loaded.
#[derive(Debug, Clone)]
pub struct Registration {
    instance: Instance,
    job: JobId,
}

impl Registration {
    /// Run `after` once the plugin has loaded, or failed to. The hook
    /// receives the failure, if any; returning `Ok` recovers it.
    ///
    /// Fails like [`Instance::after`] once the application started or the
    /// registering scope has drained.
    pub fn after<F, Fut>(self, after: F) -> Result<Self, RegisterError>
    where
        F: Fn(Option<BootError>, Instance) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let what = "after hook";
        let shared = &self.instance.shared;
        if !shared.registry.lifecycle().is_constructing() {
            return Err(RegisterError::AfterStart { what: what.into() });
        }

        let mut boot = shared.boot.lock();
        boot.ensure_open(self.instance.scope, what)?;
        boot.attach(self.instance.scope, self.job, hook(after));
        drop(boot);
        Ok(self)
    }

    /// The instance the plugin was registered through.
    pub fn instance(&self) -> &Instance {
        &self.instance
    }
}

/// An application: the root [`Instance`] plus boot, serving and teardown.
///
/// `App` dereferences to its root instance, so decorating and registering
/// at the root reads the same as inside a plugin.
#[derive(Debug, Clone)]
pub struct App {
    root: Instance,
}

impl Default for App {
    fn default() -> Self {
        Self::new(Options::default())
    }
}

impl Deref for App {
    type Target = Instance;

    fn deref(&self) -> &Self::Target {
        &self.root
    }
}

impl App {
    /// A new application in the constructing phase.
    pub fn new(options: Options) -> Self {
        let shared = Arc::new(Shared {
            options,
            registry: Registry::new(),
            boot: Mutex::new(Boot::default()),
            routes: RwLock::new(Routes::default()),
            close_hooks: Mutex::new(Vec::new()),
            outcome: OnceCell::new(),
        });
        Self {
            root: Instance::new(shared, ContextId::ROOT, ScopeId::ROOT),
        }
    }

    /// The lifecycle guard of the application.
    pub fn lifecycle(&self) -> &Lifecycle {
        self.root.shared.registry.lifecycle()
    }

    /// Load every registered plugin, then freeze the decoration tree.
    ///
    /// Boot runs once; every call resolves to the same outcome. A failed
    /// boot leaves the application constructing.
    ///
    /// A plugin body or hook of this application that calls `ready` gets
    /// [`BootError::Reentered`], since the boot it would wait for is the
    /// one running it. Tasks spawned off the boot are not tracked and
    /// would wait until the plugin timeout fires.
    pub async fn ready(&self) -> Result<(), BootError> {
        let shared = &self.root.shared;
        let id = Arc::as_ptr(shared) as usize;
        if BOOTING.try_with(|booting| *booting == id).unwrap_or(false) {
            return Err(BootError::Reentered);
        }

        shared
            .outcome
            .get_or_init(|| {
                BOOTING.scope(id, async {
                    info!("booting application");
                    run_scope(shared.clone(), ScopeId::ROOT).await?;
                    let tree = shared.registry.freeze()?;
                    info!(contexts = tree.len(), "application ready");
                    Ok(())
                })
            })
            .await
            .clone()
            .inspect_err(|error| warn!(code = %error.code(), %error, "application failed to boot"))
    }

    /// The request and reply template of `context`, once the application
    /// is ready.
    pub fn template(&self, context: ContextId) -> Option<Template> {
        let tree = self.root.shared.registry.frozen()?;
        (context.index() < tree.len()).then(|| Template::new(tree, context))
    }

    /// Serve one request for `path` in-process, booting first if needed.
    pub async fn inject(&self, path: &str) -> Result<Reply, InjectError> {
        self.ready().await?;
        let phase = self.phase();
        if phase != Phase::Ready {
            return Err(InjectError::NotServing(phase));
        }

        let route = self
            .root
            .shared
            .routes
            .read()
            .get(path)
            .ok_or_else(|| InjectError::RouteNotFound { path: path.into() })?;
        let template = self
            .template(route.context)
            .ok_or(InjectError::NotServing(phase))?;

        (route.handler)(template.request(path), template.reply())
            .await
            .map_err(|source| InjectError::Handler {
                path: path.into(),
                source: Arc::from(source),
            })
    }

    /// Tear the application down: run close hooks in reverse registration
    /// order, then settle in the closed phase. Every hook runs even when an
    /// earlier one fails; the first failure is returned. Closing an
    /// application that is already closing or closed does nothing.
    pub async fn close(&self) -> Result<(), CloseError> {
        match self.lifecycle().advance(Phase::Closing) {
            Ok(_) => {}
            Err(LifecycleError {
                from: Phase::Closing | Phase::Closed,
                ..
            }) => return Ok(()),
            Err(error) => return Err(error.into()),
        }
        info!("closing application");

        let hooks = std::mem::take(&mut *self.root.shared.close_hooks.lock());
        let mut failure: Option<BoxError> = None;
        for (context, scope, hook) in hooks.into_iter().rev() {
            let instance = Instance::new(self.root.shared.clone(), context, scope);
            if let Err(error) = hook(instance).await {
                warn!(%context, %error, "close hook failed");
                if failure.is_none() {
                    failure = Some(error);
                }
            }
        }

        self.lifecycle().advance(Phase::Closed)?;
        info!("application closed");

        match failure {
            Some(source) => Err(CloseError::Hook {
                source: Arc::from(source),
            }),
            None => Ok(()),
        }
    }
}
