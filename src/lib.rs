//! boardmux: a multi-experiment TensorBoard router.
//!
//! One stable HTTP endpoint fronts any number of TensorBoard backends. Each
//! request names a log directory (`?logdir=...`); the router starts at most one
//! backend process per directory, proxies requests to it, and reclaims
//! backends that sit idle.

pub mod backend;
pub mod cli;
pub mod config;
pub mod launcher;
pub mod logdir;
pub mod logging;
pub mod notebook;
pub mod proxy;
