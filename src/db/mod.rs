//! Database module: entity models and SQL repositories.
//!
//! - `model`: row structs and the `New*` write inputs.
//! - `repo`: SQL-only functions over the SQLite pool.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{LogLevel, NewChat, NewMessage, NewUser};
