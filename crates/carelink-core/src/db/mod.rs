//! Local database layer backing the cache store

mod connection;
mod migrations;

pub use connection::Database;
