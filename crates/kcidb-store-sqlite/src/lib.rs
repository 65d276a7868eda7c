//! SQLite backend for the KCIDB report store.
//!
//! Provides the column/table model mapping report fields onto SQLite
//! columns, the chain of schema versions a database can be initialized at
//! and upgraded through, and [`SqliteStore`], which streams report data in
//! and out and renders OO pattern queries into SQL.

mod encode;
mod oo;
mod query;
mod sql;

pub mod connection;
pub mod error;
pub mod schema;
pub mod store;
pub mod table;

pub use connection::Connection;
pub use error::{Error, Result};
pub use store::{SqliteStore, StoreOptions};
