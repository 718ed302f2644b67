//! Database module for PostgreSQL connection management
//!
//! Only the schema introspector and the query executor talk to the store; both
//! share one lazily established pool from here.

pub mod connection;

pub use connection::Database;
