//! Loyalty points ledger.
//!
//! Every checkout with a positive rounded total enqueues a pending points
//! entry keyed by order id. Pending entries only become spendable balance
//! through an admin-confirmed transfer; nothing in the system ever decreases
//! a balance.

use rusqlite::params;
use serde::Serialize;
use tracing::info;

use crate::auth::AuthState;
use crate::db::DbState;
use crate::error::StoreError;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEntry {
    pub order_id: i64,
    pub phone: String,
    pub customer_name: String,
    pub points: i64,
    pub amount: f64,
    pub date: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub phone: String,
    pub customer_name: String,
    pub points: i64,
}

/// Points awarded for an order total: the total rounded to the nearest whole
/// currency unit.
pub fn points_for_total(total: f64) -> i64 {
    total.round() as i64
}

/// Approximate redemption value shown to customers: 3 currency units per
/// full hundred points.
pub fn redemption_value(points: i64) -> i64 {
    (points / 100) * 3
}

/// Enqueue a pending entry for a completed order. Zero-point orders are
/// skipped at the call site.
pub fn enqueue_pending(db: &DbState, entry: &PendingEntry) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute(
        "INSERT OR REPLACE INTO pending_points
            (order_id, phone, customer_name, points, amount, date_display)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.order_id,
            entry.phone,
            entry.customer_name,
            entry.points,
            entry.amount,
            entry.date,
        ],
    )
    .map_err(|e| format!("enqueue pending points: {e}"))?;
    Ok(())
}

/// Pending entries awaiting confirmation, oldest first.
pub fn list_pending(db: &DbState) -> Result<Vec<PendingEntry>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare(
            "SELECT order_id, phone, customer_name, points, amount, date_display
             FROM pending_points ORDER BY order_id ASC",
        )
        .map_err(|e| e.to_string())?;
    let entries = stmt
        .query_map([], |row| {
            Ok(PendingEntry {
                order_id: row.get(0)?,
                phone: row.get(1)?,
                customer_name: row.get(2)?,
                points: row.get(3)?,
                amount: row.get(4)?,
                date: row.get(5)?,
            })
        })
        .map_err(|e| e.to_string())?
        .filter_map(|r| r.ok())
        .collect();
    Ok(entries)
}

/// All confirmed balances.
pub fn list_balances(db: &DbState) -> Result<Vec<Balance>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare("SELECT phone, customer_name, points FROM points_balances ORDER BY phone ASC")
        .map_err(|e| e.to_string())?;
    let balances = stmt
        .query_map([], |row| {
            Ok(Balance {
                phone: row.get(0)?,
                customer_name: row.get(1)?,
                points: row.get(2)?,
            })
        })
        .map_err(|e| e.to_string())?
        .filter_map(|r| r.ok())
        .collect();
    Ok(balances)
}

/// Confirmed balance for one phone number.
pub fn balance_for(db: &DbState, phone: &str) -> Result<Option<Balance>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.query_row(
        "SELECT phone, customer_name, points FROM points_balances WHERE phone = ?1",
        params![phone],
        |row| {
            Ok(Balance {
                phone: row.get(0)?,
                customer_name: row.get(1)?,
                points: row.get(2)?,
            })
        },
    )
    .map(Some)
    .or_else(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other.to_string()),
    })
}

/// Move the selected pending entries into confirmed balances.
///
/// Requires a valid admin session. The move is transactional: each selected
/// entry increments its phone's balance (the name on the entry overwrites
/// the stored name) and disappears from pending. Unselected entries and
/// unknown order ids are untouched. Returns the number of entries moved.
pub fn confirm(
    db: &DbState,
    auth: &AuthState,
    token: &str,
    order_ids: &[i64],
) -> Result<usize, StoreError> {
    auth.validate(token)?;

    let mut conn = db
        .conn
        .lock()
        .map_err(|e| StoreError::Storage(e.to_string()))?;
    let tx = conn
        .transaction()
        .map_err(|e| StoreError::Storage(e.to_string()))?;

    let mut moved = 0usize;
    for &order_id in order_ids {
        let entry = tx
            .query_row(
                "SELECT phone, customer_name, points FROM pending_points WHERE order_id = ?1",
                params![order_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(StoreError::Storage(other.to_string())),
            })?;

        let Some((phone, name, points)) = entry else {
            continue;
        };

        tx.execute(
            "INSERT INTO points_balances (phone, customer_name, points, updated_at)
             VALUES (?1, ?2, ?3, datetime('now'))
             ON CONFLICT(phone) DO UPDATE SET
                points = points_balances.points + excluded.points,
                customer_name = excluded.customer_name,
                updated_at = excluded.updated_at",
            params![phone, name, points],
        )
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        tx.execute(
            "DELETE FROM pending_points WHERE order_id = ?1",
            params![order_id],
        )
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        moved += 1;
    }

    tx.commit().map_err(|e| StoreError::Storage(e.to_string()))?;
    info!(moved, "Pending points confirmed into balances");
    Ok(moved)
}
