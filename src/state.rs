//! Shared application state.
//!
//! One `AppState` owns the database, the catalog cache, the admin session
//! table, and the optional mirror client. Every mutator persists through the
//! database layer immediately; the in-memory caches only ever hold what the
//! database (or the latest remote snapshot) already holds.

use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{self, AuthState};
use crate::catalog::{self, Product};
use crate::config::StoreConfig;
use crate::db::{self, DbState};
use crate::error::StoreError;
use crate::mirror::MirrorClient;
use crate::orders::{self, MirrorStatus, Order};

pub struct AppState {
    pub config: StoreConfig,
    pub db: DbState,
    pub auth: AuthState,
    catalog: Mutex<Vec<Product>>,
    orders_cache: Mutex<Vec<Order>>,
    pub mirror: Option<MirrorClient>,
}

impl AppState {
    /// Wire up the full state: database, catalog seed, admin secret seed,
    /// anonymous identity, and the mirror client when configured.
    pub fn init(config: StoreConfig, data_dir: &Path) -> Result<Arc<Self>, String> {
        let db = db::init(data_dir)?;
        Self::build(config, db)
    }

    /// In-memory variant for tests and throwaway runs.
    pub fn init_in_memory(config: StoreConfig) -> Result<Arc<Self>, String> {
        let db = db::init_in_memory()?;
        Self::build(config, db)
    }

    fn build(config: StoreConfig, db: DbState) -> Result<Arc<Self>, String> {
        let products = catalog::initialize(&db)?;
        auth::seed_admin_secret(&db, &config.admin_secret)?;
        let user_id = ensure_anon_user_id(&db)?;

        let mirror = match &config.mirror_base_url {
            Some(base) => Some(MirrorClient::new(base, &user_id)?),
            None => None,
        };

        let cached = orders::list_all(&db)?;
        info!(
            products = products.len(),
            orders = cached.len(),
            mirrored = mirror.is_some(),
            "Application state initialized"
        );

        Ok(Arc::new(Self {
            config,
            db,
            auth: AuthState::new(),
            catalog: Mutex::new(products),
            orders_cache: Mutex::new(cached),
            mirror,
        }))
    }

    /// Snapshot of the catalog.
    pub fn products(&self) -> Vec<Product> {
        self.catalog.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Replace the catalog, persisting the new dataset.
    pub fn set_products(&self, products: Vec<Product>) -> Result<(), String> {
        catalog::save(&self.db, &products)?;
        if let Ok(mut cache) = self.catalog.lock() {
            *cache = products;
        }
        Ok(())
    }

    /// Snapshot of the order cache, chronological.
    pub fn cached_orders(&self) -> Vec<Order> {
        self.orders_cache.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Append one order to the store and the cache.
    pub fn append_order(&self, order: Order) -> Result<(), String> {
        orders::append_order(&self.db, &order)?;
        if let Ok(mut cache) = self.orders_cache.lock() {
            cache.push(order);
        }
        Ok(())
    }

    /// Replace the order store with a snapshot (bulk overwrite). Total
    /// overwrite of both the durable store and the cache.
    pub fn replace_orders(&self, mut snapshot: Vec<Order>) -> Result<(), String> {
        snapshot.sort_by_key(|o| o.id);
        orders::replace_all(&self.db, &snapshot)?;
        if let Ok(mut cache) = self.orders_cache.lock() {
            *cache = snapshot;
        }
        Ok(())
    }

    /// Durable orders whose mirror write has not completed. These must
    /// survive any remote snapshot: the local store is the source of truth
    /// for them until the drain worker gets them across.
    fn unmirrored_orders(&self) -> Result<Vec<Order>, String> {
        Ok(orders::list_all(&self.db)?
            .into_iter()
            .filter(|o| o.mirror_status != MirrorStatus::Mirrored)
            .collect())
    }

    fn merge_unmirrored(&self, snapshot: Vec<Order>) -> Result<Vec<Order>, String> {
        let mut merged = snapshot;
        for order in self.unmirrored_orders()? {
            if !merged.iter().any(|m| m.id == order.id) {
                merged.push(order);
            }
        }
        merged.sort_by_key(|o| o.id);
        Ok(merged)
    }

    /// Apply a remote snapshot to the in-memory cache only. The durable
    /// store is untouched; unmirrored local orders are kept alongside the
    /// snapshot so a lagging or empty remote never hides them.
    pub fn apply_remote_snapshot(&self, snapshot: Vec<Order>) -> Result<(), String> {
        let merged = self.merge_unmirrored(snapshot)?;
        if let Ok(mut cache) = self.orders_cache.lock() {
            *cache = merged;
        }
        Ok(())
    }

    /// One-time startup reconciliation: the remote snapshot becomes the
    /// durable store, except that unmirrored local orders are preserved.
    pub fn reconcile_orders(&self, snapshot: Vec<Order>) -> Result<(), String> {
        let merged = self.merge_unmirrored(snapshot)?;
        self.replace_orders(merged)
    }

    /// Admin bulk clear of the local store, session-gated.
    pub fn clear_orders(&self, token: &str) -> Result<(), StoreError> {
        self.auth.validate(token)?;
        orders::clear(&self.db).map_err(StoreError::Storage)?;
        if let Ok(mut cache) = self.orders_cache.lock() {
            cache.clear();
        }
        Ok(())
    }

    /// Session-gated fulfilment transition, kept in sync with the cache.
    pub fn set_order_status(
        &self,
        token: &str,
        order_id: i64,
        status: orders::OrderStatus,
    ) -> Result<bool, StoreError> {
        self.auth.validate(token)?;
        let changed = orders::set_status(&self.db, order_id, status).map_err(StoreError::Storage)?;
        if changed {
            if let Ok(mut cache) = self.orders_cache.lock() {
                if let Some(order) = cache.iter_mut().find(|o| o.id == order_id) {
                    order.status = status;
                }
            }
        }
        Ok(changed)
    }

    /// Reload the cache from the database.
    pub fn refresh_orders_cache(&self) -> Result<(), String> {
        let fresh = orders::list_all(&self.db)?;
        if let Ok(mut cache) = self.orders_cache.lock() {
            *cache = fresh;
        }
        Ok(())
    }

    /// Session-gated fulfilment transition, propagated to the mirrored
    /// document when the order has one. Remote failure is logged only.
    pub async fn set_order_status_everywhere(
        &self,
        token: &str,
        order_id: i64,
        status: orders::OrderStatus,
    ) -> Result<bool, StoreError> {
        let changed = self.set_order_status(token, order_id, status)?;
        if changed {
            let remote_key = self
                .cached_orders()
                .iter()
                .find(|o| o.id == order_id)
                .and_then(|o| o.remote_key.clone());
            if let (Some(mirror), Some(key)) = (&self.mirror, remote_key) {
                if let Err(e) = mirror.update_order_status(&key, status.as_str()).await {
                    warn!(order_id, "Status not mirrored: {e}");
                }
            }
        }
        Ok(changed)
    }

    /// Admin bulk clear of both stores. The local clear is authoritative;
    /// the remote clear is best-effort and only logged on failure.
    pub async fn clear_orders_everywhere(&self, token: &str) -> Result<(), StoreError> {
        self.clear_orders(token)?;
        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.remove_all_orders().await {
                warn!("Remote bulk clear failed: {e}");
            }
        }
        Ok(())
    }

    /// Record a rating locally and push it to the mirror best-effort.
    pub async fn rate_product(&self, product_id: i64, stars: u8) -> Result<(), String> {
        crate::shopper::set_rating(&self.db, product_id, stars)?;
        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.save_rating(product_id, stars).await {
                warn!(product_id, "Rating not mirrored: {e}");
            }
        }
        Ok(())
    }

    /// Toggle a favorite locally and push the new snapshot best-effort.
    pub async fn toggle_favorite(&self, product_id: i64) -> Result<bool, String> {
        let now_favorite = crate::shopper::toggle_favorite(&self.db, product_id)?;
        if let Some(mirror) = &self.mirror {
            let snapshot = crate::shopper::favorites(&self.db)?;
            if let Err(e) = mirror.save_favorites(&snapshot).await {
                warn!(product_id, "Favorites not mirrored: {e}");
            }
        }
        Ok(now_favorite)
    }

    /// Pull the remote favorites snapshot and overwrite the local one. Used
    /// by the subscription side of the favorites mirror.
    pub async fn pull_favorites(&self) -> Result<(), String> {
        if let Some(mirror) = &self.mirror {
            match mirror.fetch_favorites().await {
                Ok(snapshot) => crate::shopper::replace_favorites(&self.db, &snapshot)?,
                Err(e) => warn!("Favorites fetch failed: {e}"),
            }
        }
        Ok(())
    }

    /// Average remote rating for one product, `None` without a mirror or
    /// with no ratings yet.
    pub async fn average_rating(&self, product_id: i64) -> Option<f64> {
        let mirror = self.mirror.as_ref()?;
        match mirror.fetch_ratings(product_id).await {
            Ok(stars) => crate::shopper::average_rating(&stars),
            Err(e) => {
                warn!(product_id, "Ratings fetch failed: {e}");
                None
            }
        }
    }
}

/// Stable anonymous identity for mirror documents, minted once and persisted.
fn ensure_anon_user_id(db: &DbState) -> Result<String, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    if let Some(existing) = db::get_setting(&conn, "identity", "anon_user_id") {
        return Ok(existing);
    }
    let minted = Uuid::new_v4().to_string();
    db::set_setting(&conn, "identity", "anon_user_id", &minted)?;
    Ok(minted)
}
