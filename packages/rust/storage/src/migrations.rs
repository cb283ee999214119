//! SQL migration definitions for the repository database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: nodes, properties, root node",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Content tree
CREATE TABLE IF NOT EXISTS nodes (
    path          TEXT PRIMARY KEY,
    parent_path   TEXT,
    name          TEXT NOT NULL,
    ordinal       INTEGER NOT NULL DEFAULT 0,
    primary_type  TEXT NOT NULL,
    resource_type TEXT,
    last_modified TEXT
);

CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parent_path, ordinal);
CREATE INDEX IF NOT EXISTS idx_nodes_primary_type ON nodes(primary_type);
CREATE INDEX IF NOT EXISTS idx_nodes_resource_type ON nodes(resource_type);

-- Node properties, one row per key
CREATE TABLE IF NOT EXISTS properties (
    node_path  TEXT NOT NULL REFERENCES nodes(path) ON DELETE CASCADE,
    key        TEXT NOT NULL,
    value_json TEXT NOT NULL,
    PRIMARY KEY (node_path, key)
);

INSERT OR IGNORE INTO nodes (path, parent_path, name, ordinal, primary_type)
VALUES ('/', NULL, '', 0, 'rep:root');

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Approximate descendant statistics",
            sql: r#"
CREATE TABLE IF NOT EXISTS node_stats (
    path             TEXT PRIMARY KEY,
    descendant_count INTEGER NOT NULL,
    computed_at      TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
