//! SQLite storage for the embeds sync pipeline.
//!
//! This crate provides:
//! - Async SQLite executor with a dedicated thread
//! - Schema-qualified identifiers for attached databases
//! - Versioned migrations for the `cast_embeds` table
//! - Query helpers for the source `casts` table and the target table
//!
//! ```ignore
//! let db = AsyncDatabase::open(path).await?;
//! let page = db.call(move |conn| queries::fetch_source_page(conn, &schema, &query)).await?;
//! ```

mod error;
mod executor;
pub mod migrations;
mod models;
pub mod queries;
mod schema;

pub use error::{DatabaseError, DatabaseResult};
pub use executor::AsyncDatabase;
pub use migrations::{
    AppliedMigration, MigrationInfo, MigrationManager, MigrationStatus, CURRENT_VERSION,
    DEFAULT_VERSION_TABLE,
};
pub use models::*;
pub use schema::{validate_identifier, SchemaName};
