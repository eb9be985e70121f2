//! Versioned SQLite schema definitions: declarative tables with create,
//! validate, and migrate support, shared by the crate's stores.

mod versioned_schema;

pub use versioned_schema::*;
