//! Core types and trait definitions for the KCIDB report store.
//!
//! This crate has no database dependencies. It describes
//! report documents and their versions, the object-oriented type graph used
//! for pattern queries, and the [`store::ReportStore`] contract every
//! relational backend implements.

pub mod error;
pub mod io;
pub mod orm;
pub mod store;
pub mod version;

pub use error::{Error, Result};
pub use version::Version;
