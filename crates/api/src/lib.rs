//! Read-only HTTP query surface for the gauntlet projections, plus the
//! service wiring that runs the watcher, the projections, and the server
//! as one supervised unit.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod server;
pub mod service;

pub use server::{router, AppState};
