//! Storefront backend: order capture, durable local persistence, a
//! best-effort remote mirror, monthly sales statistics, and an admin-gated
//! loyalty points ledger.
//!
//! The flow is built around the canonical Arabic order message: the composer
//! renders it, WhatsApp carries it, the local store keeps it, and the parser
//! and aggregator read it back out of historical records.

pub mod auth;
pub mod catalog;
pub mod composer;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod ledger;
pub mod mirror;
pub mod orders;
pub mod parser;
pub mod shopper;
pub mod state;
pub mod stats;

pub use composer::{Checkout, CustomerInfo, OrderRequest, RequestLine};
pub use config::StoreConfig;
pub use error::{StoreError, ValidationError};
pub use orders::{MirrorStatus, Order, OrderItem, OrderStatus};
pub use state::AppState;

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// `info` filter. Safe to call once per process.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
