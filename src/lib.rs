pub mod catalog;
pub mod cli;
pub mod config;
pub mod filter;
pub mod flock;
pub mod model;
pub mod orchestrator;
pub mod sync;
pub mod vcs;

mod api;

pub use api::{RepoMirror, RepoMirrorBuilder};
