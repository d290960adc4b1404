//! Hierarchical decoration and encapsulation for plugin-based applications.
//!
//! An application is a tree of contexts. Every plugin runs against its own
//! child context: what it declares is visible to itself and its
//! descendants, never to its parent or siblings. Declarations come in three
//! families ([`TargetKind`]): properties of the application [`Instance`],
//! and per-call properties of [`Request`] and [`Reply`] values served by the
//! routes a context owns.
//!
//! ```text
//! App (root)
//!  ├── decorate("db")                 visible everywhere
//!  ├── plugin "auth"   (context #1)
//!  │    ├── decorate_request("user")  visible to routes in #1 and below
//!  │    └── route("/me")
//!  └── plugin "public" (context #2)
//!       └── route("/")                sees "db", never "user"
//! ```
//!
//! Booting ([`App::ready`]) loads plugins in registration order, each one
//! fully (including everything it registers) before its next sibling, then
//! freezes the tree. Once frozen, declarations are refused and requests can
//! be served ([`App::inject`]).

mod app;
pub use app::*;

mod boot;

mod decoration;
pub use decoration::*;

pub mod dependency;

mod error;
pub use error::*;

mod lifecycle;
pub use lifecycle::*;

mod options;
pub use options::*;

mod plugin;
pub use plugin::{FnPlugin, Plugin, PluginMeta, RequiredDecorators, plugin};

mod registry;
pub use registry::*;

mod route;
pub use route::{Handler, handler};

mod template;
pub use template::*;

pub mod tree;
pub use tree::{Chain, ContextId, Node, Tree};
