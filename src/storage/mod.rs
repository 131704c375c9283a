pub mod migrations;
pub mod registry;
pub mod sqlite;
pub mod writer;
