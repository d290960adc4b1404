//! The boot scheduler.
//!
//! Every plugin body runs against its own scope: a FIFO queue of the plugins
//! and hooks it registered. A scope is drained only after the body that owns
//! it has resolved, so nested plugins always observe everything their parent
//! declared synchronously. Draining a plugin job runs its body, then drains
//! its scope depth-first, then records its name and runs the hooks attached
//! to it through [`crate::Registration::after`].
//!
//! ```text
//! root scope:  [ a, b, hook, c ]
//!                │
//!                └─ a's scope: [ a1, a2 ]   drained before b starts
//! ```
//!
//! Standalone hooks act as barriers: dependency reordering only permutes the
//! run of plugin jobs in front of the first hook.

use std::{collections::VecDeque, sync::Arc};

use futures::{FutureExt, future::BoxFuture};
use serde_json::Value;
use tracing::{debug, warn};
use trellis_common::{TrellisAsyncError, deadline};

use crate::{
    BootError, ContextId, Instance, Plugin, PluginMeta, RegisterError, Reply, Request, TargetKind,
    app::Shared,
    plugin::Hook,
};

/// Identifies one plugin scope of an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ScopeId(usize);

impl ScopeId {
    pub(crate) const ROOT: ScopeId = ScopeId(0);
}

/// Identifies one queued plugin job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct JobId(usize);

pub(crate) struct Pending {
    pub(crate) id: JobId,
    pub(crate) plugin: Arc<dyn Plugin>,
    pub(crate) meta: PluginMeta,
    pub(crate) options: Value,
    /// The context the body runs against
    pub(crate) context: ContextId,
    /// The scope collecting what the body registers
    pub(crate) scope: ScopeId,
    pub(crate) hooks: Vec<Hook>,
}

pub(crate) enum Job {
    Plugin(Pending),
    Hook(Hook),
}

impl Job {
    fn name(&self) -> Option<&str> {
        match self {
            Job::Plugin(pending) => pending.meta.name.as_deref(),
            Job::Hook(_) => None,
        }
    }
}

struct Scope {
    context: ContextId,
    queue: VecDeque<Job>,
    loaded: bool,
}

/// Scope queues of one application.
pub(crate) struct Boot {
    scopes: Vec<Scope>,
    jobs: usize,
}

impl Default for Boot {
    fn default() -> Self {
        Self {
            scopes: vec![Scope {
                context: ContextId::ROOT,
                queue: VecDeque::new(),
                loaded: false,
            }],
            jobs: 0,
        }
    }
}

impl Boot {
    pub(crate) fn context(&self, scope: ScopeId) -> ContextId {
        self.scopes[scope.0].context
    }

    /// Fail with [`RegisterError::ScopeLoaded`] when `scope` has drained.
    pub(crate) fn ensure_open(&self, scope: ScopeId, what: &str) -> Result<(), RegisterError> {
        if self.scopes[scope.0].loaded {
            return Err(RegisterError::ScopeLoaded { what: what.into() });
        }
        Ok(())
    }

    pub(crate) fn open_scope(&mut self, context: ContextId) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(Scope {
            context,
            queue: VecDeque::new(),
            loaded: false,
        });
        id
    }

    pub(crate) fn next_job(&mut self) -> JobId {
        let id = JobId(self.jobs);
        self.jobs += 1;
        id
    }

    pub(crate) fn enqueue(&mut self, scope: ScopeId, job: Job) {
        self.scopes[scope.0].queue.push_back(job);
    }

    /// Attach `hook` to the queued job `id`. When the job already left the
    /// queue the hook is queued on its own, which still runs it after the
    /// job completes.
    pub(crate) fn attach(&mut self, scope: ScopeId, id: JobId, hook: Hook) {
        let queue = &mut self.scopes[scope.0].queue;
        let pending = queue.iter_mut().find_map(|job| match job {
            Job::Plugin(pending) if pending.id == id => Some(pending),
            _ => None,
        });
        match pending {
            Some(pending) => pending.hooks.push(hook),
            None => queue.push_back(Job::Hook(hook)),
        }
    }

    /// Pop the next job of `scope`, after reordering the plugins in front of
    /// the first barrier so that dependencies load first.
    fn pop(
        &mut self,
        scope: ScopeId,
        loaded: impl Fn(&str) -> bool,
    ) -> Result<Option<Job>, BootError> {
        let queue = &mut self.scopes[scope.0].queue;
        schedule(queue, loaded)?;
        Ok(queue.pop_front())
    }

    fn finish(&mut self, scope: ScopeId) {
        self.scopes[scope.0].loaded = true;
    }
}

/// Stable topological reorder of the plugin jobs in front of the first
/// standalone hook. A job is ready once none of its dependencies is still
/// waiting in the same segment; among ready jobs registration order wins.
/// Dependencies that are neither loaded nor in the segment are left for the
/// load-time check to report.
fn schedule(queue: &mut VecDeque<Job>, loaded: impl Fn(&str) -> bool) -> Result<(), BootError> {
    let barrier = queue
        .iter()
        .position(|job| matches!(job, Job::Hook(_)))
        .unwrap_or(queue.len());
    if barrier < 2 {
        return Ok(());
    }

    let mut waiting: Vec<Job> = queue.drain(..barrier).collect();
    let mut ordered = Vec::with_capacity(waiting.len());

    while !waiting.is_empty() {
        let ready = waiting.iter().position(|job| {
            let Job::Plugin(pending) = job else {
                return true;
            };
            pending.meta.dependencies.iter().all(|dependency| {
                loaded(dependency) || !waiting.iter().any(|other| other.name() == Some(dependency.as_str()))
            })
        });

        match ready {
            Some(index) => ordered.push(waiting.remove(index)),
            None => {
                let plugins = waiting
                    .iter()
                    .filter_map(|job| job.name().map(String::from))
                    .collect();
                // Put everything back so the queue stays intact.
                for job in ordered.into_iter().chain(waiting).rev() {
                    queue.push_front(job);
                }
                return Err(BootError::DependencyCycle { plugins });
            }
        }
    }

    for job in ordered.into_iter().rev() {
        queue.push_front(job);
    }
    Ok(())
}

/// Drain `scope`, loading every plugin it holds and running its hooks.
///
/// A failure that no attached hook recovered stays pending while standalone
/// hooks follow it: each of them receives it and may recover it in turn.
/// The scope aborts once a plugin job or the end of the queue is reached
/// with the failure still pending.
pub(crate) fn run_scope(shared: Arc<Shared>, scope: ScopeId) -> BoxFuture<'static, Result<(), BootError>> {
    async move {
        let context = shared.boot.lock().context(scope);
        let mut failure: Option<BootError> = None;

        loop {
            let job = {
                let mut boot = shared.boot.lock();
                boot.pop(scope, |name| shared.registry.has_plugin(context, name))?
            };

            match job {
                None => break,
                Some(Job::Hook(hook)) => {
                    let recovering = failure.is_some();
                    let instance = Instance::new(shared.clone(), context, scope);
                    failure = hook(failure, instance).await.err().map(BootError::from_hook);
                    if recovering && failure.is_none() {
                        warn!(%context, "boot failure recovered by hook");
                    }
                }
                Some(Job::Plugin(_)) if failure.is_some() => break,
                Some(Job::Plugin(mut pending)) => {
                    let hooks = std::mem::take(&mut pending.hooks);
                    let name = pending.meta.display_name().to_owned();
                    failure = load(shared.clone(), pending, context).await.err();

                    for hook in hooks {
                        let recovering = failure.is_some();
                        let instance = Instance::new(shared.clone(), context, scope);
                        failure = hook(failure, instance).await.err().map(BootError::from_hook);
                        if recovering && failure.is_none() {
                            warn!(plugin = %name, "plugin failure recovered by hook");
                        }
                    }
                }
            }
        }

        if let Some(error) = failure {
            return Err(error);
        }
        shared.boot.lock().finish(scope);
        Ok(())
    }
    .boxed()
}

/// Load one plugin registered from the scope whose context is `registrant`.
async fn load(shared: Arc<Shared>, pending: Pending, registrant: ContextId) -> Result<(), BootError> {
    let name = pending.meta.display_name().to_owned();

    for dependency in &pending.meta.dependencies {
        if !shared.registry.has_plugin(registrant, dependency) {
            return Err(BootError::MissingPlugin {
                plugin: name,
                dependency: dependency.clone(),
            });
        }
    }

    for (target, decorator) in pending.meta.decorators.iter() {
        let present = match target {
            TargetKind::Instance => shared.registry.contains::<Instance>(pending.context, decorator),
            TargetKind::Request => shared.registry.contains::<Request>(pending.context, decorator),
            TargetKind::Reply => shared.registry.contains::<Reply>(pending.context, decorator),
        };
        if !present {
            return Err(BootError::MissingDecorator {
                plugin: name,
                name: decorator.into(),
                target,
            });
        }
    }

    debug!(plugin = %name, context = %pending.context, "loading plugin");
    let instance = Instance::new(shared.clone(), pending.context, pending.scope);
    let body = pending.plugin.register(instance, pending.options);
    match deadline(shared.options.plugin_timeout(), body).await {
        Ok(Ok(())) => {}
        Ok(Err(source)) => {
            return Err(BootError::Plugin {
                plugin: name,
                source: Arc::from(source),
            });
        }
        Err(TrellisAsyncError::Elapsed(timeout)) => {
            return Err(BootError::Timeout {
                plugin: name,
                timeout,
            });
        }
        Err(error @ TrellisAsyncError::JoinError) => {
            return Err(BootError::Plugin {
                plugin: name,
                source: Arc::new(error),
            });
        }
    }

    run_scope(shared.clone(), pending.scope).await?;

    if let Some(name) = &pending.meta.name {
        shared.registry.record_plugin(registrant, name);
    }
    debug!(plugin = %name, "plugin loaded");
    Ok(())
}
