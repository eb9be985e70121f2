//! Database schema for activity.db.
//!
//! Defines versioned schema migrations for the activity log database.

use crate::sqlite_persistence::{SqlType, Table, VersionedSchema};
use crate::table_column;

/// Append-only activity log
const ACTIVITY_LOG_TABLE_V1: Table = Table {
    name: "activity_log",
    columns: &[
        table_column!("id", SqlType::Integer, primary_key = true),
        table_column!("service", SqlType::Text, not_null = true),
        table_column!("activity_type", SqlType::Text, not_null = true),
        table_column!("severity", SqlType::Text, not_null = true),
        table_column!("message", SqlType::Text, not_null = true),
        table_column!("correlation_id", SqlType::Text),
        table_column!("metadata", SqlType::Text),
        table_column!("timestamp", SqlType::Integer, not_null = true),
        table_column!("created_at", SqlType::Integer, not_null = true),
    ],
    indices: &[
        ("idx_activity_timestamp", "timestamp"),
        ("idx_activity_correlation", "correlation_id"),
        ("idx_activity_service", "service"),
        ("idx_activity_type", "activity_type"),
        ("idx_activity_severity", "severity"),
    ],
};

pub const ACTIVITY_LOG_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[ACTIVITY_LOG_TABLE_V1],
    migration: None,
}];
