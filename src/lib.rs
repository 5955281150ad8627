//! Execution and job-control core of a small interactive shell.
//!
//! A parsed [`CmdLine`] has its words expanded by [`expand::expand`] and
//! then goes through [`eval::eval`]: every stage is resolved, forked with
//! its pipe ends and redirects wired in, then either awaited in the
//! foreground or reported as a background job. Terminal
//! signals reaching the shell meanwhile are relayed to the foreground job.

pub mod builtin;
pub mod config;
pub mod error;
pub mod eval;
pub mod expand;
pub mod global;
pub mod job;
pub mod launch;
pub mod parser;
pub mod prompt;
pub mod resolve;
pub mod search;
pub mod signal;
pub mod types;

pub use crate::types::CmdLine;
