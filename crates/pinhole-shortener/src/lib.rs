//! URL shortener service implementation.
//!
//! This crate provides [`ShortenerService`], the implementation of the
//! `Shortener` facade, and the worker pool it uses for soft deletion. Core
//! types are re-exported from `pinhole_core`.

pub mod deletion;
pub mod service;

pub use deletion::DeletionWorkerPool;
pub use pinhole_core::{Shortener, ShortenerError, Statistics, UserUrl};
pub use service::{ServiceSettings, ShortenerService};
