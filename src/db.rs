//! Local SQLite database layer.
//!
//! Uses rusqlite with WAL mode. Provides schema migrations, the
//! `local_settings` category/key/value store that backs the storefront's
//! JSON-valued keys (product cache, cart, favorites, ratings, UI flags),
//! and shared connection state.

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

/// Shared state holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Initialize the database at `{data_dir}/store.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(data_dir: &Path) -> Result<DbState, String> {
    fs::create_dir_all(data_dir).map_err(|e| format!("Failed to create data dir: {e}"))?;

    let db_path = data_dir.join("store.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                let _ = fs::remove_file(db_path.with_extension("db-wal"));
                let _ = fs::remove_file(db_path.with_extension("db-shm"));
            }
            open_and_configure(&db_path)
                .map_err(|e| format!("Database open failed after retry: {e}"))?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open an in-memory database with migrations applied. Used by callers that
/// want a throwaway store (and by tests).
pub fn init_in_memory() -> Result<DbState, String> {
    let conn = Connection::open_in_memory().map_err(|e| format!("sqlite open: {e}"))?;
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;
    run_migrations(&conn)?;
    Ok(DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("create schema_version: {e}"))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Migration v1: settings store and the orders table.
///
/// `orders.id` is the creation timestamp in milliseconds; it doubles as the
/// order id and the chronological tiebreaker. `details` is the canonical
/// human-readable record; `items` is the structured (schema-versioned)
/// rendering of the same rows. `mirror_status` makes the best-effort remote
/// replication observable instead of silent.
fn migrate_v1(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        -- local_settings (category/key/value store)
        CREATE TABLE IF NOT EXISTS local_settings (
            id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        -- orders
        CREATE TABLE IF NOT EXISTS orders (
            id INTEGER PRIMARY KEY,
            date_display TEXT NOT NULL,
            details TEXT NOT NULL,
            items TEXT NOT NULL DEFAULT '[]',
            record_version INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'fulfilled')),
            remote_key TEXT,
            mirror_status TEXT NOT NULL DEFAULT 'pending'
                CHECK (mirror_status IN ('pending', 'mirrored', 'failed')),
            mirror_attempts INTEGER NOT NULL DEFAULT 0,
            mirror_last_error TEXT,
            created_at TEXT DEFAULT (datetime('now'))
        );

        -- Indexes
        CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status);
        CREATE INDEX IF NOT EXISTS idx_orders_mirror_status ON orders(mirror_status);
        CREATE INDEX IF NOT EXISTS idx_local_settings_cat_key
            ON local_settings(setting_category, setting_key);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        format!("migration v1: {e}")
    })?;

    info!("Applied migration v1");
    Ok(())
}

/// Migration v2: loyalty points tables.
fn migrate_v2(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        -- pending_points (one entry per order awaiting admin confirmation)
        CREATE TABLE IF NOT EXISTS pending_points (
            order_id INTEGER PRIMARY KEY,
            phone TEXT NOT NULL,
            customer_name TEXT NOT NULL DEFAULT '',
            points INTEGER NOT NULL,
            amount REAL NOT NULL,
            date_display TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now'))
        );

        -- points_balances (confirmed balances keyed by phone)
        CREATE TABLE IF NOT EXISTS points_balances (
            phone TEXT PRIMARY KEY,
            customer_name TEXT NOT NULL DEFAULT '',
            points INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_pending_points_phone ON pending_points(phone);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        format!("migration v2: {e}")
    })?;

    info!("Applied migration v2 (loyalty points tables)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Get a single setting value.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(
    conn: &Connection,
    category: &str,
    key: &str,
    value: &str,
) -> Result<(), String> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )
    .map_err(|e| format!("set_setting: {e}"))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// JSON-valued local keys
// ---------------------------------------------------------------------------

/// Read a JSON value stored under the "local" settings category.
/// Missing or unparseable values read as `Null`.
pub fn read_local_json(db: &DbState, key: &str) -> Result<serde_json::Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    if let Some(raw) = get_setting(&conn, "local", key) {
        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&raw) {
            return Ok(parsed);
        }
    }
    Ok(serde_json::Value::Null)
}

/// Read a JSON array stored under the "local" settings category, defaulting
/// to an empty array.
pub fn read_local_json_array(db: &DbState, key: &str) -> Result<Vec<serde_json::Value>, String> {
    let parsed = read_local_json(db, key)?;
    Ok(parsed.as_array().cloned().unwrap_or_default())
}

/// Serialize a JSON value under the "local" settings category.
pub fn write_local_json(db: &DbState, key: &str, value: &serde_json::Value) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    set_setting(&conn, "local", key, &value.to_string())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: list table names in the database.
    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .expect("prepare table list");
        stmt.query_map([], |row| row.get(0))
            .expect("query tables")
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn test_migrations_v1_to_latest() {
        let db = init_in_memory().expect("init in-memory db");
        let conn = db.conn.lock().unwrap();
        let tables = table_names(&conn);

        assert!(
            tables.contains(&"local_settings".to_string()),
            "missing local_settings"
        );
        assert!(tables.contains(&"orders".to_string()), "missing orders");
        assert!(
            tables.contains(&"pending_points".to_string()),
            "missing pending_points"
        );
        assert!(
            tables.contains(&"points_balances".to_string()),
            "missing points_balances"
        );

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .expect("read schema version");
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let db = init_in_memory().expect("init");
        let conn = db.conn.lock().unwrap();
        run_migrations(&conn).expect("second run should succeed");

        let count: i32 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .expect("count versions");
        assert_eq!(count, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_settings_roundtrip_and_overwrite() {
        let db = init_in_memory().expect("init");
        let conn = db.conn.lock().unwrap();

        set_setting(&conn, "store", "data_version", "1.4").expect("set");
        assert_eq!(
            get_setting(&conn, "store", "data_version").as_deref(),
            Some("1.4")
        );

        set_setting(&conn, "store", "data_version", "1.5").expect("overwrite");
        assert_eq!(
            get_setting(&conn, "store", "data_version").as_deref(),
            Some("1.5")
        );
    }

    #[test]
    fn test_local_json_defaults() {
        let db = init_in_memory().expect("init");
        assert_eq!(
            read_local_json(&db, "cart").expect("read"),
            serde_json::Value::Null
        );
        assert!(read_local_json_array(&db, "favorites")
            .expect("read array")
            .is_empty());

        write_local_json(&db, "cart", &serde_json::json!([{ "productId": 3, "qty": 2 }]))
            .expect("write");
        let cart = read_local_json_array(&db, "cart").expect("read back");
        assert_eq!(cart.len(), 1);
    }
}
