//! Core types and traits for the Pinhole URL shortener.
//!
//! This crate provides the types shared by the storage backends, the
//! code generators and the shortener service.

pub mod base58;
pub mod error;
pub mod repository;
pub mod shortcode;
pub mod shortener;

pub use error::{CoreError, ShortenerError, StorageError};
pub use repository::{ReadRepository, Repository, Statistics, StoredUrl, UrlRecord, UserUrl};
pub use shortcode::ShortCode;
pub use shortener::Shortener;
