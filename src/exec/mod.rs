// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`command`] describes one external tool invocation as data.
//! - [`backend`] provides the `CommandRunner` trait, the production
//!   `TokioRunner`, and `run_checked`, which turns non-zero exits into errors.
//! - [`pool`] is the bounded worker pool used by parallel and bundle pushes.

pub mod backend;
pub mod command;
pub mod pool;

pub use backend::{CommandRunner, TokioRunner, run_checked};
pub use command::{ToolCommand, ToolOutput};
pub use pool::WorkerPool;
