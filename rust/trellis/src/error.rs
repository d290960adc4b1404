//! Error types for decoration, plugin registration, boot, serving and
//! teardown.
//!
//! Every error exposes a stable [`ErrorCode`] so the surrounding framework
//! can classify failures without matching on message text.

use std::{error::Error, fmt, sync::Arc, time::Duration};

use serde::Serialize;
use thiserror::Error;

use crate::{Phase, TargetKind};

/// Boxed error returned by plugin bodies and hooks.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Shared form of [`BoxError`], used where errors have to be cloned.
pub type SharedError = Arc<dyn Error + Send + Sync>;

/// Machine readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Decoration
    /// A context declared the same name twice for one target kind
    DecAlreadyPresent,
    /// A declared dependency is not resolvable on the chain
    DecMissingDependency,
    /// A decoration was attempted once the application left construction
    DecAfterStart,
    /// A value was written through a getter-only accessor or an instance value
    DecReadOnly,

    // Registration
    /// A plugin, hook or route was registered after start
    RootPluginBooted,
    /// A plugin was registered into a scope that already finished loading
    PluginScopeLoaded,
    /// Two routes were registered for the same path
    RouteAlreadyPresent,

    // Boot
    /// A plugin requires a decorator that is not present
    PluginMissingDecorator,
    /// A plugin requires another plugin that is never loaded before it
    PluginMissingDependency,
    /// Plugins depend on each other in a cycle
    PluginDependencyCycle,
    /// A plugin body did not complete in time
    PluginTimeout,
    /// A plugin body failed
    PluginFailed,
    /// A post-bootstrap hook failed
    HookFailed,
    /// A plugin body or hook waited on the boot it is part of
    BootReentered,

    // Serving and teardown
    /// No route is registered for the path
    RouteNotFound,
    /// The application is not in the ready phase
    NotServing,
    /// A route handler failed
    HandlerFailed,
    /// A close hook failed
    CloseHookFailed,
    /// An illegal lifecycle transition was requested
    InvalidTransition,
}

impl ErrorCode {
    /// The code as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::DecAlreadyPresent => "DEC_ALREADY_PRESENT",
            ErrorCode::DecMissingDependency => "DEC_MISSING_DEPENDENCY",
            ErrorCode::DecAfterStart => "DEC_AFTER_START",
            ErrorCode::DecReadOnly => "DEC_READ_ONLY",
            ErrorCode::RootPluginBooted => "ROOT_PLUGIN_BOOTED",
            ErrorCode::PluginScopeLoaded => "PLUGIN_SCOPE_LOADED",
            ErrorCode::RouteAlreadyPresent => "ROUTE_ALREADY_PRESENT",
            ErrorCode::PluginMissingDecorator => "PLUGIN_MISSING_DECORATOR",
            ErrorCode::PluginMissingDependency => "PLUGIN_MISSING_DEPENDENCY",
            ErrorCode::PluginDependencyCycle => "PLUGIN_DEPENDENCY_CYCLE",
            ErrorCode::PluginTimeout => "PLUGIN_TIMEOUT",
            ErrorCode::PluginFailed => "PLUGIN_FAILED",
            ErrorCode::HookFailed => "HOOK_FAILED",
            ErrorCode::BootReentered => "BOOT_REENTERED",
            ErrorCode::RouteNotFound => "ROUTE_NOT_FOUND",
            ErrorCode::NotServing => "NOT_SERVING",
            ErrorCode::HandlerFailed => "HANDLER_FAILED",
            ErrorCode::CloseHookFailed => "CLOSE_HOOK_FAILED",
            ErrorCode::InvalidTransition => "INVALID_TRANSITION",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised synchronously by `decorate*` calls and by property writes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecorateError {
    /// The name already exists on this very context for this target kind.
    #[error("The decorator '{name}' has already been added!")]
    AlreadyPresent {
        /// Decorator name
        name: String,
        /// Target kind of the clashing decorator
        target: TargetKind,
    },

    /// A declared dependency does not resolve on the chain.
    #[error("The decorator is missing dependency '{name}'.")]
    MissingDependency {
        /// The unresolved dependency
        name: String,
        /// Target kind the dependency was looked up on
        target: TargetKind,
    },

    /// The lifecycle guard has left the constructing phase.
    #[error("The decorator '{name}' has been added after start!")]
    AfterStart {
        /// Decorator name
        name: String,
    },

    /// The property can not be written.
    #[error("The decorator '{name}' has no setter")]
    ReadOnly {
        /// Decorator name
        name: String,
    },
}

impl DecorateError {
    /// The error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            DecorateError::AlreadyPresent { .. } => ErrorCode::DecAlreadyPresent,
            DecorateError::MissingDependency { .. } => ErrorCode::DecMissingDependency,
            DecorateError::AfterStart { .. } => ErrorCode::DecAfterStart,
            DecorateError::ReadOnly { .. } => ErrorCode::DecReadOnly,
        }
    }
}

/// Errors raised when registering plugins, hooks or routes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    /// The application already left the constructing phase.
    #[error("Can not register '{what}': the application has already started")]
    AfterStart {
        /// What was being registered
        what: String,
    },

    /// The registering scope has already drained its queue.
    #[error("Can not register '{what}': its enclosing plugin has already loaded")]
    ScopeLoaded {
        /// What was being registered
        what: String,
    },

    /// Another route already owns the path.
    #[error("Route '{path}' has already been added")]
    DuplicateRoute {
        /// The contested path
        path: String,
    },
}

impl RegisterError {
    /// The error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            RegisterError::AfterStart { .. } => ErrorCode::RootPluginBooted,
            RegisterError::ScopeLoaded { .. } => ErrorCode::PluginScopeLoaded,
            RegisterError::DuplicateRoute { .. } => ErrorCode::RouteAlreadyPresent,
        }
    }
}

/// Errors that abort booting.
///
/// Boot errors are cloneable because the outcome of a boot is shared by
/// every caller of [`crate::App::ready`].
#[derive(Debug, Clone, Error)]
pub enum BootError {
    /// A plugin requires a decorator that is not present on its chain.
    #[error("The decorator '{name}' is not present in {target}")]
    MissingDecorator {
        /// Plugin name
        plugin: String,
        /// Missing decorator
        name: String,
        /// Target kind of the missing decorator
        target: TargetKind,
    },

    /// A plugin requires another plugin that was never loaded before it.
    #[error("The dependency '{dependency}' of plugin '{plugin}' is not registered")]
    MissingPlugin {
        /// Plugin name
        plugin: String,
        /// Missing plugin name
        dependency: String,
    },

    /// Sibling plugins depend on each other.
    #[error("Plugins {plugins:?} depend on each other")]
    DependencyCycle {
        /// The plugins involved in the cycle
        plugins: Vec<String>,
    },

    /// A plugin body did not signal completion in time.
    #[error("Plugin '{plugin}' did not start in time ({timeout:?})")]
    Timeout {
        /// Plugin name
        plugin: String,
        /// The configured limit
        timeout: Duration,
    },

    /// A plugin body failed.
    #[error("Plugin '{plugin}' failed: {source}")]
    Plugin {
        /// Plugin name
        plugin: String,
        /// The failure reported by the plugin body
        #[source]
        source: SharedError,
    },

    /// A post-bootstrap hook failed.
    #[error("Post-bootstrap hook failed: {source}")]
    Hook {
        /// The failure reported by the hook
        #[source]
        source: SharedError,
    },

    /// A plugin body or hook waited for the boot that is running it.
    #[error("The application cannot wait for its own boot from a plugin or hook")]
    Reentered,

    /// The application left construction before boot completed.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl BootError {
    /// The error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            BootError::MissingDecorator { .. } => ErrorCode::PluginMissingDecorator,
            BootError::MissingPlugin { .. } => ErrorCode::PluginMissingDependency,
            BootError::DependencyCycle { .. } => ErrorCode::PluginDependencyCycle,
            BootError::Timeout { .. } => ErrorCode::PluginTimeout,
            BootError::Plugin { .. } => ErrorCode::PluginFailed,
            BootError::Hook { .. } => ErrorCode::HookFailed,
            BootError::Reentered => ErrorCode::BootReentered,
            BootError::Lifecycle(error) => error.code(),
        }
    }

    /// The decoration failure that made a plugin or hook fail, if any.
    pub fn decorate_error(&self) -> Option<&DecorateError> {
        match self {
            BootError::Plugin { source, .. } | BootError::Hook { source } => {
                source.downcast_ref::<DecorateError>()
            }
            _ => None,
        }
    }

    /// Turn an error returned from a hook back into a boot error. Boot errors
    /// handed back by the hook are propagated unchanged.
    pub(crate) fn from_hook(error: BoxError) -> Self {
        match error.downcast::<BootError>() {
            Ok(error) => *error,
            Err(error) => BootError::Hook {
                source: Arc::from(error),
            },
        }
    }
}

/// Errors raised when serving an injected request.
#[derive(Debug, Clone, Error)]
pub enum InjectError {
    /// The application failed to boot.
    #[error(transparent)]
    Boot(#[from] BootError),

    /// The application is not ready to serve.
    #[error("The application is not serving (phase: {0})")]
    NotServing(Phase),

    /// No route owns the path.
    #[error("No route registered for '{path}'")]
    RouteNotFound {
        /// Requested path
        path: String,
    },

    /// The route handler failed.
    #[error("Handler for '{path}' failed: {source}")]
    Handler {
        /// Requested path
        path: String,
        /// The failure reported by the handler
        #[source]
        source: SharedError,
    },
}

impl InjectError {
    /// The error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            InjectError::Boot(error) => error.code(),
            InjectError::NotServing(_) => ErrorCode::NotServing,
            InjectError::RouteNotFound { .. } => ErrorCode::RouteNotFound,
            InjectError::Handler { .. } => ErrorCode::HandlerFailed,
        }
    }
}

/// Errors raised while closing the application.
#[derive(Debug, Clone, Error)]
pub enum CloseError {
    /// The lifecycle refused the transition.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// A close hook failed. All hooks still ran.
    #[error("Close hook failed: {source}")]
    Hook {
        /// The first failure reported by a close hook
        #[source]
        source: SharedError,
    },
}

impl CloseError {
    /// The error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            CloseError::Lifecycle(error) => error.code(),
            CloseError::Hook { .. } => ErrorCode::CloseHookFailed,
        }
    }
}

/// An illegal lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Illegal lifecycle transition from {from} to {to}")]
pub struct LifecycleError {
    /// The phase the guard was in
    pub from: Phase,
    /// The phase that was requested
    pub to: Phase,
}

impl LifecycleError {
    /// The error code for this error.
    pub fn code(&self) -> ErrorCode {
        ErrorCode::InvalidTransition
    }
}
