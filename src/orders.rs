//! Local order store.
//!
//! Orders are the durable record of every checkout. The `details` text is the
//! canonical human-readable rendering (it is also what gets handed to
//! WhatsApp); the `items` column carries the same rows structured and
//! schema-versioned so later consumers never have to re-parse the text.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::db::DbState;

/// Schema version of the structured `items` record.
pub const ITEMS_RECORD_VERSION: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Fulfilled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Fulfilled => "fulfilled",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "fulfilled" => OrderStatus::Fulfilled,
            _ => OrderStatus::Pending,
        }
    }

    /// Arabic display label, matching the historical records.
    pub fn display(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "قيد الانتظار",
            OrderStatus::Fulfilled => "تم التنفيذ",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorStatus {
    Pending,
    Mirrored,
    Failed,
}

impl MirrorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MirrorStatus::Pending => "pending",
            MirrorStatus::Mirrored => "mirrored",
            MirrorStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "mirrored" => MirrorStatus::Mirrored,
            "failed" => MirrorStatus::Failed,
            _ => MirrorStatus::Pending,
        }
    }
}

/// One structured line on an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_code: String,
    pub product_name: String,
    pub qty: u32,
    pub unit_price: f64,
    pub line_total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Creation timestamp in milliseconds. Doubles as the order id.
    pub id: i64,
    /// Locale display date, e.g. "24/08/2026, 14:03:00".
    pub date: String,
    /// Canonical outbound text.
    pub details: String,
    #[serde(default)]
    pub items: Vec<OrderItem>,
    #[serde(default = "default_record_version")]
    pub record_version: i32,
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_key: Option<String>,
    #[serde(default = "default_mirror_status")]
    pub mirror_status: MirrorStatus,
}

fn default_record_version() -> i32 {
    ITEMS_RECORD_VERSION
}

fn default_mirror_status() -> MirrorStatus {
    MirrorStatus::Pending
}

fn row_to_order(row: &rusqlite::Row) -> rusqlite::Result<Order> {
    let items_json: String = row.get("items")?;
    let items = serde_json::from_str(&items_json).unwrap_or_default();
    let status: String = row.get("status")?;
    let mirror_status: String = row.get("mirror_status")?;
    Ok(Order {
        id: row.get("id")?,
        date: row.get("date_display")?,
        details: row.get("details")?,
        items,
        record_version: row.get("record_version")?,
        status: OrderStatus::from_str(&status),
        remote_key: row.get("remote_key")?,
        mirror_status: MirrorStatus::from_str(&mirror_status),
    })
}

fn insert_order(conn: &Connection, order: &Order) -> Result<(), String> {
    let items_json = serde_json::to_string(&order.items).map_err(|e| e.to_string())?;
    conn.execute(
        "INSERT OR REPLACE INTO orders
            (id, date_display, details, items, record_version, status,
             remote_key, mirror_status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            order.id,
            order.date,
            order.details,
            items_json,
            order.record_version,
            order.status.as_str(),
            order.remote_key,
            order.mirror_status.as_str(),
        ],
    )
    .map_err(|e| format!("insert order: {e}"))?;
    Ok(())
}

/// Append one order. Storage failures are logged and reported but callers on
/// the checkout path treat them as non-fatal.
pub fn append_order(db: &DbState, order: &Order) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    insert_order(&conn, order).map_err(|e| {
        warn!(order_id = order.id, "Failed to persist order locally: {e}");
        e
    })
}

/// All orders, oldest first (chronological by id).
pub fn list_all(db: &DbState) -> Result<Vec<Order>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare("SELECT * FROM orders ORDER BY id ASC")
        .map_err(|e| e.to_string())?;
    let orders = stmt
        .query_map([], row_to_order)
        .map_err(|e| e.to_string())?
        .filter_map(|r| r.ok())
        .collect();
    Ok(orders)
}

/// Total overwrite of the order table. Used by remote reconciliation and the
/// admin bulk clear; orders absent from the snapshot are gone afterwards.
pub fn replace_all(db: &DbState, orders: &[Order]) -> Result<(), String> {
    let mut conn = db.conn.lock().map_err(|e| e.to_string())?;
    let tx = conn.transaction().map_err(|e| e.to_string())?;
    tx.execute("DELETE FROM orders", [])
        .map_err(|e| e.to_string())?;
    for order in orders {
        insert_order(&tx, order)?;
    }
    tx.commit().map_err(|e| e.to_string())
}

/// Delete every order.
pub fn clear(db: &DbState) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute("DELETE FROM orders", [])
        .map_err(|e| e.to_string())?;
    Ok(())
}

/// Transition an order's fulfilment status.
pub fn set_status(db: &DbState, order_id: i64, status: OrderStatus) -> Result<bool, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let changed = conn
        .execute(
            "UPDATE orders SET status = ?1 WHERE id = ?2",
            params![status.as_str(), order_id],
        )
        .map_err(|e| e.to_string())?;
    Ok(changed > 0)
}

/// Record the outcome of a mirror attempt.
pub fn set_mirror_result(
    db: &DbState,
    order_id: i64,
    status: MirrorStatus,
    remote_key: Option<&str>,
    error: Option<&str>,
) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute(
        "UPDATE orders SET
            mirror_status = ?1,
            remote_key = COALESCE(?2, remote_key),
            mirror_attempts = mirror_attempts + 1,
            mirror_last_error = ?3
         WHERE id = ?4",
        params![status.as_str(), remote_key, error, order_id],
    )
    .map_err(|e| e.to_string())?;
    Ok(())
}

/// Orders still awaiting a successful mirror write, with their attempt count.
pub fn list_unmirrored(db: &DbState, max_attempts: i64) -> Result<Vec<Order>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare(
            "SELECT * FROM orders
             WHERE mirror_status = 'pending' AND mirror_attempts < ?1
             ORDER BY id ASC",
        )
        .map_err(|e| e.to_string())?;
    let orders = stmt
        .query_map(params![max_attempts], row_to_order)
        .map_err(|e| e.to_string())?
        .filter_map(|r| r.ok())
        .collect();
    Ok(orders)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::init_in_memory;

    pub(crate) fn sample_order(id: i64) -> Order {
        Order {
            id,
            date: "24/08/2026, 14:03:00".to_string(),
            details: format!("*طلب جديد من متجر MAHFOOR CNC*\n\norder {id}"),
            items: vec![OrderItem {
                product_code: "301".to_string(),
                product_name: "مقلمة".to_string(),
                qty: 2,
                unit_price: 55.0,
                line_total: 110.0,
            }],
            record_version: ITEMS_RECORD_VERSION,
            status: OrderStatus::Pending,
            remote_key: None,
            mirror_status: MirrorStatus::Pending,
        }
    }

    #[test]
    fn test_append_and_list_roundtrip() {
        let db = init_in_memory().expect("db");
        append_order(&db, &sample_order(1000)).expect("append");
        append_order(&db, &sample_order(2000)).expect("append");

        let orders = list_all(&db).expect("list");
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].id, 1000);
        assert_eq!(orders[1].id, 2000);
        assert_eq!(orders[0].items.len(), 1);
        assert_eq!(orders[0].items[0].qty, 2);
        assert_eq!(orders[0].status, OrderStatus::Pending);
    }

    #[test]
    fn test_replace_all_is_total_overwrite() {
        let db = init_in_memory().expect("db");
        append_order(&db, &sample_order(1000)).expect("append");
        append_order(&db, &sample_order(2000)).expect("append");

        replace_all(&db, &[sample_order(3000)]).expect("replace");

        let orders = list_all(&db).expect("list");
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].id, 3000);
    }

    #[test]
    fn test_clear_empties_the_store() {
        let db = init_in_memory().expect("db");
        append_order(&db, &sample_order(1000)).expect("append");
        clear(&db).expect("clear");
        assert!(list_all(&db).expect("list").is_empty());
    }

    #[test]
    fn test_status_transition() {
        let db = init_in_memory().expect("db");
        append_order(&db, &sample_order(1000)).expect("append");

        assert!(set_status(&db, 1000, OrderStatus::Fulfilled).expect("set"));
        let orders = list_all(&db).expect("list");
        assert_eq!(orders[0].status, OrderStatus::Fulfilled);

        // Unknown id changes nothing.
        assert!(!set_status(&db, 9999, OrderStatus::Fulfilled).expect("set"));
    }

    #[test]
    fn test_mirror_bookkeeping() {
        let db = init_in_memory().expect("db");
        append_order(&db, &sample_order(1000)).expect("append");

        let unmirrored = list_unmirrored(&db, 3).expect("list unmirrored");
        assert_eq!(unmirrored.len(), 1);

        set_mirror_result(&db, 1000, MirrorStatus::Mirrored, Some("-Nabc123"), None)
            .expect("mark mirrored");

        assert!(list_unmirrored(&db, 3).expect("list").is_empty());
        let orders = list_all(&db).expect("list");
        assert_eq!(orders[0].mirror_status, MirrorStatus::Mirrored);
        assert_eq!(orders[0].remote_key.as_deref(), Some("-Nabc123"));
    }

    #[test]
    fn test_failed_mirror_keeps_order_local() {
        let db = init_in_memory().expect("db");
        append_order(&db, &sample_order(1000)).expect("append");
        set_mirror_result(&db, 1000, MirrorStatus::Failed, None, Some("timeout"))
            .expect("mark failed");

        let orders = list_all(&db).expect("list");
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].mirror_status, MirrorStatus::Failed);
    }
}
