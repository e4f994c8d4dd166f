pub mod memory;
pub mod repo;
pub mod sqlite;
