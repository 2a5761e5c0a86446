//! Schema-qualified identifiers.
//!
//! A schema in SQLite is `main`, `temp`, or the alias of an attached database.
//! Names are validated as plain identifiers and always emitted double-quoted,
//! so they can be interpolated into statement text.

use crate::{DatabaseError, DatabaseResult};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Checks that `name` matches `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_identifier(name: &str) -> DatabaseResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(DatabaseError::InvalidData(format!(
            "invalid SQL identifier: {name:?}"
        )))
    }
}

/// Double-quotes a validated identifier.
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{name}\"")
}

/// A validated schema name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaName(String);

impl SchemaName {
    pub fn new(name: impl Into<String>) -> DatabaseResult<Self> {
        let name = name.into();
        validate_identifier(&name)?;
        Ok(Self(name))
    }

    /// The primary database of a connection.
    pub fn main() -> Self {
        Self("main".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `"schema"`
    pub fn quoted(&self) -> String {
        quote_identifier(&self.0)
    }

    /// `"schema"."table"`
    pub fn qualify(&self, table: &str) -> String {
        format!("{}.{}", self.quoted(), quote_identifier(table))
    }

    /// Whether this schema is visible on `conn` (main, temp or attached).
    pub fn exists(&self, conn: &Connection) -> DatabaseResult<bool> {
        let mut stmt = conn.prepare("PRAGMA database_list")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names.iter().any(|n| n.eq_ignore_ascii_case(&self.0)))
    }
}

impl Default for SchemaName {
    fn default() -> Self {
        Self::main()
    }
}

impl fmt::Display for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SchemaName {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SchemaName {
    type Error = DatabaseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SchemaName> for String {
    fn from(value: SchemaName) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_identifiers() {
        for name in ["main", "_private", "k3l", "Schema_2"] {
            assert!(SchemaName::new(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn rejects_anything_else() {
        for name in ["", "1abc", "a-b", "a b", "x\";DROP TABLE t;--", "ä"] {
            assert!(SchemaName::new(name).is_err(), "{name}");
        }
    }

    #[test]
    fn qualifies_tables() {
        let schema: SchemaName = "analytics".parse().unwrap();
        assert_eq!(schema.qualify("cast_embeds"), "\"analytics\".\"cast_embeds\"");
    }

    #[test]
    fn serde_validates() {
        let ok: SchemaName = serde_json::from_str("\"main\"").unwrap();
        assert_eq!(ok, SchemaName::main());
        assert!(serde_json::from_str::<SchemaName>("\"bad name\"").is_err());
    }

    #[test]
    fn main_schema_exists() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(SchemaName::main().exists(&conn).unwrap());
        assert!(!SchemaName::new("missing").unwrap().exists(&conn).unwrap());
    }
}
