//! The jplot live terminal dashboard
//!
//! jplot samples a JSON source, either an HTTP endpoint polled on an interval
//! or a stream of documents on standard input, extracts numeric fields as
//! described by a set of graph specifications and plots their recent history
//! as an image drawn inline in the terminal. This library holds the pieces of
//! that pipeline. The `jplot` binary wires them together.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod dash;
pub mod render;
pub mod sampler;
pub mod scheduler;
pub mod screen;
pub mod series;
pub mod spec;

#[cfg(test)]
mod testing;
