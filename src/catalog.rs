//! Product catalog.
//!
//! The catalog ships as a bundled dataset and is cached in `local_settings`
//! under the "products" key. A stored version tag guards the cache: when the
//! bundled `DATA_VERSION` moves past the persisted tag, the cache is
//! invalidated and reseeded so stale product data never survives an update.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::DATA_VERSION;
use crate::db::{self, DbState};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub price: f64,
    /// Percentage discount, 0 when absent.
    #[serde(default)]
    pub discount: f64,
    #[serde(default)]
    pub img: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub dimensions: String,
    #[serde(default)]
    pub video: Option<String>,
    #[serde(default = "default_true")]
    pub available: bool,
}

fn default_true() -> bool {
    true
}

impl Product {
    /// Price after applying the percentage discount.
    pub fn effective_price(&self) -> f64 {
        if self.discount > 0.0 {
            self.price * (1.0 - self.discount / 100.0)
        } else {
            self.price
        }
    }
}

/// The bundled default dataset.
pub fn bundled_products() -> Vec<Product> {
    vec![
        Product {
            id: 1,
            code: "101".to_string(),
            name: "علب مناديل خشبية".to_string(),
            price: 165.0,
            discount: 0.0,
            img: String::new(),
            images: Vec::new(),
            category: "ديكور".to_string(),
            details: "علبة مناديل خشبية بتصميم CNC".to_string(),
            dimensions: "24 × 12 × 9 سم".to_string(),
            video: None,
            available: true,
        },
        Product {
            id: 2,
            code: "202".to_string(),
            name: "حامل موبايل".to_string(),
            price: 65.0,
            discount: 0.0,
            img: String::new(),
            images: Vec::new(),
            category: "اكسسوارات".to_string(),
            details: "حامل موبايل خشبي قابل للطي".to_string(),
            dimensions: "18 × 8 سم".to_string(),
            video: None,
            available: true,
        },
        Product {
            id: 3,
            code: "301".to_string(),
            name: "مقلمة".to_string(),
            price: 55.0,
            discount: 0.0,
            img: String::new(),
            images: Vec::new(),
            category: "مكتب".to_string(),
            details: "مقلمة خشبية بأقسام متعددة".to_string(),
            dimensions: "15 × 10 × 8 سم".to_string(),
            video: None,
            available: true,
        },
        Product {
            id: 4,
            code: "XO004".to_string(),
            name: "لعبه x.o".to_string(),
            price: 99.0,
            discount: 0.0,
            img: String::new(),
            images: Vec::new(),
            category: "ألعاب".to_string(),
            details: "لعبة اكس او خشبية".to_string(),
            dimensions: "20 × 20 سم".to_string(),
            video: None,
            available: true,
        },
        Product {
            id: 5,
            code: "CS005".to_string(),
            name: "كوستر".to_string(),
            price: 30.0,
            discount: 0.0,
            img: String::new(),
            images: Vec::new(),
            category: "مطبخ".to_string(),
            details: "كوستر خشبي للأكواب".to_string(),
            dimensions: "10 × 10 سم".to_string(),
            video: None,
            available: true,
        },
    ]
}

/// Load the catalog, reseeding from the bundled dataset when the persisted
/// version tag does not match `DATA_VERSION`.
pub fn initialize(db: &DbState) -> Result<Vec<Product>, String> {
    let stored_version = {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        db::get_setting(&conn, "store", "data_version")
    };

    if stored_version.as_deref() == Some(DATA_VERSION) {
        let cached = db::read_local_json(db, "products")?;
        if let Ok(products) = serde_json::from_value::<Vec<Product>>(cached) {
            if !products.is_empty() {
                return Ok(products);
            }
        }
    }

    info!(
        old = stored_version.as_deref().unwrap_or("none"),
        new = DATA_VERSION,
        "Reseeding product catalog from bundled dataset"
    );

    let products = bundled_products();
    save(db, &products)?;
    Ok(products)
}

/// Persist the catalog cache and stamp the version tag.
pub fn save(db: &DbState, products: &[Product]) -> Result<(), String> {
    let value = serde_json::to_value(products).map_err(|e| e.to_string())?;
    db::write_local_json(db, "products", &value)?;
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    db::set_setting(&conn, "store", "data_version", DATA_VERSION)
}

pub fn find_by_code<'a>(products: &'a [Product], code: &str) -> Option<&'a Product> {
    products.iter().find(|p| p.code == code)
}

pub fn find_by_id(products: &[Product], id: i64) -> Option<&Product> {
    products.iter().find(|p| p.id == id)
}
