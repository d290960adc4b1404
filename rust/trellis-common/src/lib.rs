#![warn(missing_docs)]

//! This crate constitutes a library of light weight helpers that are shared
//! across the trellis crates: a shared interior-mutability
//! cell, deadlines and a result-collecting task queue.

mod sync;
pub use sync::*;

mod r#async;
pub use r#async::*;
