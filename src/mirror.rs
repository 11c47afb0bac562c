//! Remote mirror adapter.
//!
//! Best-effort replication of orders (plus ratings and favorites) to a
//! remote JSON document store, addressed RTDB-style: a collection lives at
//! `{base}/{collection}.json`, a document at `{base}/{collection}/{key}.json`,
//! and a POST to the collection returns `{"name": "<generated key>"}`.
//!
//! Nothing here ever sits on the checkout critical path. Write failures are
//! recorded on the order row (`mirror_status`) and retried by the drain
//! worker with a bounded attempt count.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::db::DbState;
use crate::error::StoreError;
use crate::orders::{self, MirrorStatus, Order};

/// Bounded availability probe: 50 attempts, 100 ms apart.
const AVAILABILITY_ATTEMPTS: u32 = 50;
const AVAILABILITY_INTERVAL: Duration = Duration::from_millis(100);

/// Mirror writes give up after this many attempts per order.
pub const MAX_MIRROR_ATTEMPTS: i64 = 3;

#[derive(Clone)]
pub struct MirrorClient {
    base_url: String,
    client: reqwest::Client,
    /// Anonymous identity tagged onto ratings and favorites documents.
    user_id: String,
}

fn friendly_http_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "request timed out".to_string()
    } else if e.is_connect() {
        "could not reach the mirror host".to_string()
    } else {
        e.to_string()
    }
}

impl MirrorClient {
    pub fn new(base_url: &str, user_id: &str) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| format!("http client: {e}"))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            user_id: user_id.to_string(),
        })
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/{collection}.json", self.base_url)
    }

    fn document_url(&self, collection: &str, key: &str) -> String {
        format!("{}/{collection}/{key}.json", self.base_url)
    }

    /// Cheap reachability probe.
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/.json?shallow=true", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("Mirror probe failed: {}", friendly_http_error(&e));
                false
            }
        }
    }

    /// Wait for the mirror to come up, bounded. Returns false when the
    /// attempts are exhausted; callers then degrade to local-only.
    pub async fn wait_until_available(&self) -> bool {
        for attempt in 1..=AVAILABILITY_ATTEMPTS {
            if self.is_available().await {
                if attempt > 1 {
                    info!(attempt, "Mirror became available");
                }
                return true;
            }
            tokio::time::sleep(AVAILABILITY_INTERVAL).await;
        }
        warn!("Mirror unavailable after bounded wait, running local-only");
        false
    }

    /// Push one order to the remote collection. Returns the generated key.
    pub async fn save_order(&self, order: &Order) -> Result<String, StoreError> {
        let payload = serde_json::to_value(order)
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        let resp = self
            .client
            .post(self.collection_url("orders"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| StoreError::RemoteUnavailable(friendly_http_error(&e)))?;

        if !resp.status().is_success() {
            return Err(StoreError::RemoteUnavailable(format!(
                "mirror rejected order: HTTP {}",
                resp.status()
            )));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| StoreError::RemoteUnavailable(friendly_http_error(&e)))?;
        body.get("name")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                StoreError::RemoteUnavailable("mirror response missing document key".to_string())
            })
    }

    /// Fetch the full remote order collection, newest first. Each order is
    /// annotated with its remote key.
    pub async fn fetch_orders(&self) -> Result<Vec<Order>, StoreError> {
        let resp = self
            .client
            .get(self.collection_url("orders"))
            .send()
            .await
            .map_err(|e| StoreError::RemoteUnavailable(friendly_http_error(&e)))?;

        if !resp.status().is_success() {
            return Err(StoreError::RemoteUnavailable(format!(
                "mirror fetch failed: HTTP {}",
                resp.status()
            )));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| StoreError::RemoteUnavailable(friendly_http_error(&e)))?;

        // An empty collection reads as null.
        let map: BTreeMap<String, Value> = match body {
            Value::Null => BTreeMap::new(),
            other => serde_json::from_value(other)
                .map_err(|e| StoreError::RemoteUnavailable(format!("bad collection shape: {e}")))?,
        };

        let mut fetched: Vec<Order> = map
            .into_iter()
            .filter_map(|(key, value)| {
                let mut order: Order = serde_json::from_value(value).ok()?;
                order.remote_key = Some(key);
                order.mirror_status = MirrorStatus::Mirrored;
                Some(order)
            })
            .collect();

        fetched.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(fetched)
    }

    /// Propagate a fulfilment status change to the mirrored document.
    pub async fn update_order_status(
        &self,
        remote_key: &str,
        status: &str,
    ) -> Result<(), StoreError> {
        let resp = self
            .client
            .patch(self.document_url("orders", remote_key))
            .json(&serde_json::json!({ "status": status }))
            .send()
            .await
            .map_err(|e| StoreError::RemoteUnavailable(friendly_http_error(&e)))?;
        if !resp.status().is_success() {
            return Err(StoreError::RemoteUnavailable(format!(
                "status update failed: HTTP {}",
                resp.status()
            )));
        }
        Ok(())
    }

    /// Admin bulk clear of the remote collection.
    pub async fn remove_all_orders(&self) -> Result<(), StoreError> {
        let resp = self
            .client
            .delete(self.collection_url("orders"))
            .send()
            .await
            .map_err(|e| StoreError::RemoteUnavailable(friendly_http_error(&e)))?;
        if !resp.status().is_success() {
            return Err(StoreError::RemoteUnavailable(format!(
                "bulk clear failed: HTTP {}",
                resp.status()
            )));
        }
        info!("Remote order collection cleared");
        Ok(())
    }

    /// Store one star rating under `ratings/{product_id}/{user_id}`. One
    /// rating per anonymous user per product; a repeat overwrites.
    pub async fn save_rating(&self, product_id: i64, stars: u8) -> Result<(), StoreError> {
        let url = self.document_url(&format!("ratings/{product_id}"), &self.user_id);
        let resp = self
            .client
            .put(&url)
            .json(&serde_json::json!(stars))
            .send()
            .await
            .map_err(|e| StoreError::RemoteUnavailable(friendly_http_error(&e)))?;
        if !resp.status().is_success() {
            return Err(StoreError::RemoteUnavailable(format!(
                "rating push failed: HTTP {}",
                resp.status()
            )));
        }
        Ok(())
    }

    /// Fetch all ratings for a product, keyed by anonymous user id.
    pub async fn fetch_ratings(&self, product_id: i64) -> Result<Vec<u8>, StoreError> {
        let resp = self
            .client
            .get(self.collection_url(&format!("ratings/{product_id}")))
            .send()
            .await
            .map_err(|e| StoreError::RemoteUnavailable(friendly_http_error(&e)))?;
        let body: Value = resp
            .json()
            .await
            .map_err(|e| StoreError::RemoteUnavailable(friendly_http_error(&e)))?;
        let map: BTreeMap<String, Value> = match body {
            Value::Null => BTreeMap::new(),
            other => serde_json::from_value(other)
                .map_err(|e| StoreError::RemoteUnavailable(format!("bad ratings shape: {e}")))?,
        };
        Ok(map
            .into_values()
            .filter_map(|v| v.as_u64().map(|n| n.min(5) as u8))
            .collect())
    }

    /// Replace this user's remote favorites snapshot.
    pub async fn save_favorites(&self, product_ids: &[i64]) -> Result<(), StoreError> {
        let resp = self
            .client
            .put(self.document_url("favorites", &self.user_id))
            .json(&serde_json::json!(product_ids))
            .send()
            .await
            .map_err(|e| StoreError::RemoteUnavailable(friendly_http_error(&e)))?;
        if !resp.status().is_success() {
            return Err(StoreError::RemoteUnavailable(format!(
                "favorites push failed: HTTP {}",
                resp.status()
            )));
        }
        Ok(())
    }

    /// Fetch this user's remote favorites snapshot.
    pub async fn fetch_favorites(&self) -> Result<Vec<i64>, StoreError> {
        let resp = self
            .client
            .get(self.document_url("favorites", &self.user_id))
            .send()
            .await
            .map_err(|e| StoreError::RemoteUnavailable(friendly_http_error(&e)))?;
        let body: Value = resp
            .json()
            .await
            .map_err(|e| StoreError::RemoteUnavailable(friendly_http_error(&e)))?;
        Ok(serde_json::from_value(body).unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Background workers
// ---------------------------------------------------------------------------

/// Handle for stopping a polling subscription.
pub struct Subscription {
    running: Arc<AtomicBool>,
}

impl Subscription {
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Poll the remote order collection and hand each successful snapshot to the
/// callback. The callback replaces the in-memory cache; local persistence is
/// the callback's concern.
pub fn subscribe_orders<F>(client: MirrorClient, poll_interval: Duration, on_snapshot: F) -> Subscription
where
    F: Fn(Vec<Order>) + Send + Sync + 'static,
{
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    tokio::spawn(async move {
        info!("Mirror subscription started");
        while flag.load(Ordering::SeqCst) {
            match client.fetch_orders().await {
                Ok(snapshot) => on_snapshot(snapshot),
                Err(e) => debug!("Mirror poll failed: {e}"),
            }
            tokio::time::sleep(poll_interval).await;
        }
        info!("Mirror subscription stopped");
    });
    Subscription { running }
}

/// Retry orders whose mirror write has not succeeded yet. Each pass attempts
/// every order still under the attempt cap; an order that exhausts the cap
/// is marked failed and stops being retried.
pub async fn drain_pending(db: &DbState, client: &MirrorClient) -> Result<usize, String> {
    let pending = orders::list_unmirrored(db, MAX_MIRROR_ATTEMPTS)?;
    if pending.is_empty() {
        return Ok(0);
    }

    let mut mirrored = 0usize;
    for order in &pending {
        match client.save_order(order).await {
            Ok(key) => {
                orders::set_mirror_result(db, order.id, MirrorStatus::Mirrored, Some(&key), None)?;
                mirrored += 1;
            }
            Err(e) => {
                warn!(order_id = order.id, "Mirror write failed: {e}");
                let attempts: i64 = {
                    let conn = db.conn.lock().map_err(|e| e.to_string())?;
                    conn.query_row(
                        "SELECT mirror_attempts FROM orders WHERE id = ?1",
                        [order.id],
                        |row| row.get(0),
                    )
                    .unwrap_or(0)
                };
                let status = if attempts + 1 >= MAX_MIRROR_ATTEMPTS {
                    MirrorStatus::Failed
                } else {
                    MirrorStatus::Pending
                };
                orders::set_mirror_result(db, order.id, status, None, Some(&e.to_string()))?;
            }
        }
    }

    info!(mirrored, total = pending.len(), "Mirror drain pass complete");
    Ok(mirrored)
}
