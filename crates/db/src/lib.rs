//! Persistence layer: sqlite pool construction, embedded migrations, and
//! repository traits with SQL and in-memory implementations.
//!
//! Repositories are deliberately narrow: one acquire-use-release operation
//! per call, no transaction ever spanning a network call made by a caller.

pub mod connection;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_with, DbPool};
