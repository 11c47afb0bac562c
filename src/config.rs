//! Store configuration.
//!
//! Defaults match the production deployment. A JSON config file can override
//! any field, and a handful of environment variables override the file for
//! containerised deployments. The admin secret is only ever stored hashed
//! (see `auth`), and is never logged.

use serde::Deserialize;
use std::path::Path;

/// Current bundled product dataset version. Bump when the seed data changes;
/// a mismatch against the persisted tag forces a catalog reseed.
pub const DATA_VERSION: &str = "1.4";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreConfig {
    /// WhatsApp destination in international format, used for the checkout
    /// handoff URL.
    pub whatsapp_number: String,
    /// Brand name rendered in the order message and in exports.
    pub brand_name: String,
    pub brand_logo_url: String,
    /// Shared admin secret; hashed into the local database on first init.
    pub admin_secret: String,
    /// Base URL of the remote mirror document store. `None` runs local-only.
    pub mirror_base_url: Option<String>,
    /// Polling interval for the mirror subscription, in seconds.
    pub mirror_poll_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            whatsapp_number: "+201033662370".to_string(),
            brand_name: "MAHFOOR CNC".to_string(),
            brand_logo_url: "https://i.postimg.cc/4NSrnTbt/photo-2025-09-26-07-00-26.jpg"
                .to_string(),
            admin_secret: "22/7/2009".to_string(),
            mirror_base_url: None,
            mirror_poll_secs: 5,
        }
    }
}

impl StoreConfig {
    /// Load config from a JSON file, falling back to defaults for missing
    /// fields, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, String> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| format!("read config {}: {e}", path.display()))?;
            serde_json::from_str(&raw).map_err(|e| format!("parse config: {e}"))?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Environment overrides, applied after file load.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("MAHFOOR_WHATSAPP_NUMBER") {
            if !v.trim().is_empty() {
                self.whatsapp_number = v.trim().to_string();
            }
        }
        if let Ok(v) = std::env::var("MAHFOOR_ADMIN_SECRET") {
            if !v.is_empty() {
                self.admin_secret = v;
            }
        }
        if let Ok(v) = std::env::var("MAHFOOR_MIRROR_URL") {
            let trimmed = v.trim().trim_end_matches('/').to_string();
            if !trimmed.is_empty() {
                self.mirror_base_url = Some(trimmed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment() {
        let config = StoreConfig::default();
        assert_eq!(config.brand_name, "MAHFOOR CNC");
        assert!(config.whatsapp_number.starts_with('+'));
        assert!(config.mirror_base_url.is_none());
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let parsed: StoreConfig =
            serde_json::from_str(r#"{ "brandName": "TEST SHOP" }"#).expect("parse partial config");
        assert_eq!(parsed.brand_name, "TEST SHOP");
        assert_eq!(parsed.whatsapp_number, StoreConfig::default().whatsapp_number);
    }
}
