use anyhow::{bail, Result};
use rusqlite::{Connection, Row};
use std::fmt::Write as _;

/// Offset applied to `PRAGMA user_version` so an unrelated SQLite file,
/// whose user_version is 0, is never mistaken for a schema at version 0.
pub const USER_VERSION_BASE: usize = 99999;

/// Default expression for unix-epoch creation timestamps.
pub const UNIX_NOW: &str = "(cast(strftime('%s','now') as int))";

/// Builds a [`Column`] with optional flags, e.g.
/// `table_column!("id", SqlType::Integer, primary_key = true)`.
#[macro_export]
macro_rules! table_column {
    ($name:expr, $sql_type:expr $(, $flag:ident = $value:expr)*) => {{
        // unused_mut fires when no flags are passed
        #[allow(unused_mut)]
        let mut column = $crate::sqlite_persistence::Column {
            name: $name,
            sql_type: $sql_type,
            primary_key: false,
            not_null: false,
            default_expr: None,
        };
        $(column.$flag = $value;)*
        column
    }};
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
    Real,
    Blob,
}

impl SqlType {
    fn keyword(self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
            SqlType::Blob => "BLOB",
        }
    }

    fn from_keyword(keyword: &str) -> Option<SqlType> {
        match keyword {
            "TEXT" => Some(SqlType::Text),
            "INTEGER" => Some(SqlType::Integer),
            "REAL" => Some(SqlType::Real),
            "BLOB" => Some(SqlType::Blob),
            _ => None,
        }
    }
}

pub struct Column {
    pub name: &'static str,
    pub sql_type: SqlType,
    pub primary_key: bool,
    pub not_null: bool,
    pub default_expr: Option<&'static str>,
}

impl Column {
    fn definition(&self) -> String {
        let mut sql = format!("{} {}", self.name, self.sql_type.keyword());
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
        }
        if self.not_null {
            sql.push_str(" NOT NULL");
        }
        if let Some(expr) = self.default_expr {
            let _ = write!(sql, " DEFAULT {}", expr);
        }
        sql
    }
}

pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column],
    /// (index name, indexed column)
    pub indices: &'static [(&'static str, &'static str)],
}

impl Table {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        let definitions: Vec<String> = self.columns.iter().map(Column::definition).collect();
        conn.execute(
            &format!("CREATE TABLE {} ({});", self.name, definitions.join(", ")),
            [],
        )?;
        for (index_name, column_name) in self.indices {
            conn.execute(
                &format!("CREATE INDEX {} ON {}({});", index_name, self.name, column_name),
                [],
            )?;
        }
        Ok(())
    }

    fn validate(&self, conn: &Connection) -> Result<()> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", self.name))?;
        let live: Vec<LiveColumn> = stmt
            .query_map([], LiveColumn::from_row)?
            .collect::<rusqlite::Result<_>>()?;

        if live.len() != self.columns.len() {
            let found: Vec<&str> = live.iter().map(|c| c.name.as_str()).collect();
            let expected: Vec<&str> = self.columns.iter().map(|c| c.name).collect();
            bail!(
                "table {}: found {} columns [{}], expected {} [{}]",
                self.name,
                live.len(),
                found.join(", "),
                self.columns.len(),
                expected.join(", ")
            );
        }
        for (live_column, expected) in live.iter().zip(self.columns) {
            live_column.check_against(self.name, expected)?;
        }

        for (index_name, _) in self.indices {
            let found: bool = conn
                .query_row(
                    "SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?1 AND tbl_name = ?2",
                    rusqlite::params![index_name, self.name],
                    |_| Ok(true),
                )
                .unwrap_or(false);
            if !found {
                bail!("table {} is missing index '{}'", self.name, index_name);
            }
        }
        Ok(())
    }
}

/// One column as reported by `PRAGMA table_info`.
struct LiveColumn {
    name: String,
    type_keyword: String,
    not_null: bool,
    default_expr: Option<String>,
    primary_key: bool,
}

impl LiveColumn {
    fn from_row(row: &Row) -> rusqlite::Result<LiveColumn> {
        Ok(LiveColumn {
            name: row.get(1)?,
            type_keyword: row.get(2)?,
            not_null: row.get::<_, i32>(3)? != 0,
            default_expr: row.get(4)?,
            primary_key: row.get::<_, i32>(5)? != 0,
        })
    }

    fn check_against(&self, table: &str, expected: &Column) -> Result<()> {
        if self.name != expected.name {
            bail!(
                "table {}: expected column {}, found {}",
                table,
                expected.name,
                self.name
            );
        }
        if SqlType::from_keyword(&self.type_keyword) != Some(expected.sql_type) {
            bail!(
                "table {} column {}: type mismatch, expected {:?}, found {}",
                table,
                self.name,
                expected.sql_type,
                self.type_keyword
            );
        }
        if self.not_null != expected.not_null {
            bail!(
                "table {} column {}: NOT NULL mismatch, expected {}",
                table,
                self.name,
                expected.not_null
            );
        }
        if self.primary_key != expected.primary_key {
            bail!(
                "table {} column {}: PRIMARY KEY mismatch, expected {}",
                table,
                self.name,
                expected.primary_key
            );
        }
        // SQLite may echo a default back with wrapping parentheses stripped
        // or added, so compare the bare expression.
        if self.default_expr.as_deref().map(unparenthesize)
            != expected.default_expr.map(unparenthesize)
        {
            bail!(
                "table {} column {}: default mismatch, expected {:?}, found {:?}",
                table,
                self.name,
                expected.default_expr,
                self.default_expr
            );
        }
        Ok(())
    }
}

fn unparenthesize(expr: &str) -> &str {
    expr.strip_prefix('(')
        .and_then(|inner| inner.strip_suffix(')'))
        .unwrap_or(expr)
}

pub struct VersionedSchema {
    pub version: usize,
    pub tables: &'static [Table],
    /// Bring a database at the previous version up to this one.
    pub migration: Option<fn(&Connection) -> Result<()>>,
}

impl VersionedSchema {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table.create(conn)?;
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", USER_VERSION_BASE + self.version),
            [],
        )?;
        Ok(())
    }

    pub fn validate(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table.validate(conn)?;
        }
        Ok(())
    }
}
