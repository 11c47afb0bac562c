//! Shopper-side local state: cart, favorites, ratings, UI flags.
//!
//! Every mutator re-serializes its key immediately, so the database is the
//! only source of truth and a crash never loses a cart. Remote propagation
//! of favorites and ratings is the mirror adapter's concern; the favorites
//! subscription overwrites the local snapshot through `replace_favorites`.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

use crate::db::{self, DbState};

const CART_KEY: &str = "cart";
const FAVORITES_KEY: &str = "favorites";
const RATINGS_KEY: &str = "ratings";
const FILTERS_KEY: &str = "filters_collapsed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: i64,
    pub qty: u32,
}

// ---------------------------------------------------------------------------
// Cart
// ---------------------------------------------------------------------------

pub fn cart_items(db: &DbState) -> Result<Vec<CartLine>, String> {
    let raw = db::read_local_json(db, CART_KEY)?;
    Ok(serde_json::from_value(raw).unwrap_or_default())
}

fn save_cart(db: &DbState, cart: &[CartLine]) -> Result<(), String> {
    let value = serde_json::to_value(cart).map_err(|e| e.to_string())?;
    db::write_local_json(db, CART_KEY, &value)
}

/// Add to the cart, merging with an existing line for the same product.
pub fn add_to_cart(db: &DbState, product_id: i64, qty: u32) -> Result<(), String> {
    let qty = qty.max(1);
    let mut cart = cart_items(db)?;
    match cart.iter_mut().find(|l| l.product_id == product_id) {
        Some(line) => line.qty += qty,
        None => cart.push(CartLine { product_id, qty }),
    }
    save_cart(db, &cart)
}

/// Set a line's quantity; zero removes the line.
pub fn set_cart_qty(db: &DbState, product_id: i64, qty: u32) -> Result<(), String> {
    let mut cart = cart_items(db)?;
    if qty == 0 {
        cart.retain(|l| l.product_id != product_id);
    } else if let Some(line) = cart.iter_mut().find(|l| l.product_id == product_id) {
        line.qty = qty;
    } else {
        cart.push(CartLine { product_id, qty });
    }
    save_cart(db, &cart)
}

pub fn remove_from_cart(db: &DbState, product_id: i64) -> Result<(), String> {
    let mut cart = cart_items(db)?;
    cart.retain(|l| l.product_id != product_id);
    save_cart(db, &cart)
}

pub fn clear_cart(db: &DbState) -> Result<(), String> {
    save_cart(db, &[])
}

/// Total quantity across all lines, for the cart badge.
pub fn cart_count(db: &DbState) -> Result<u32, String> {
    Ok(cart_items(db)?.iter().map(|l| l.qty).sum())
}

// ---------------------------------------------------------------------------
// Favorites
// ---------------------------------------------------------------------------

pub fn favorites(db: &DbState) -> Result<Vec<i64>, String> {
    let raw = db::read_local_json(db, FAVORITES_KEY)?;
    Ok(serde_json::from_value(raw).unwrap_or_default())
}

/// Toggle a favorite. Returns true when the product is now a favorite.
pub fn toggle_favorite(db: &DbState, product_id: i64) -> Result<bool, String> {
    let mut favs = favorites(db)?;
    let now_favorite = if let Some(pos) = favs.iter().position(|&id| id == product_id) {
        favs.remove(pos);
        false
    } else {
        favs.push(product_id);
        true
    };
    db::write_local_json(db, FAVORITES_KEY, &json!(favs))?;
    Ok(now_favorite)
}

/// Overwrite the favorites snapshot. Used by the remote subscription.
pub fn replace_favorites(db: &DbState, product_ids: &[i64]) -> Result<(), String> {
    db::write_local_json(db, FAVORITES_KEY, &json!(product_ids))
}

// ---------------------------------------------------------------------------
// Ratings
// ---------------------------------------------------------------------------

/// This user's own ratings, keyed by product id.
pub fn my_ratings(db: &DbState) -> Result<BTreeMap<i64, u8>, String> {
    let raw = db::read_local_json(db, RATINGS_KEY)?;
    Ok(serde_json::from_value(raw).unwrap_or_default())
}

/// Record a 1..=5 star rating. A repeat for the same product overwrites.
pub fn set_rating(db: &DbState, product_id: i64, stars: u8) -> Result<(), String> {
    if !(1..=5).contains(&stars) {
        return Err(format!("rating out of range: {stars}"));
    }
    let mut ratings = my_ratings(db)?;
    ratings.insert(product_id, stars);
    let value = serde_json::to_value(&ratings).map_err(|e| e.to_string())?;
    db::write_local_json(db, RATINGS_KEY, &value)
}

/// Average of a fetched rating set, `None` when empty.
pub fn average_rating(stars: &[u8]) -> Option<f64> {
    if stars.is_empty() {
        return None;
    }
    let sum: u32 = stars.iter().map(|&s| u32::from(s)).sum();
    Some(f64::from(sum) / stars.len() as f64)
}

// ---------------------------------------------------------------------------
// UI flags
// ---------------------------------------------------------------------------

pub fn filters_collapsed(db: &DbState) -> Result<bool, String> {
    let raw = db::read_local_json(db, FILTERS_KEY)?;
    Ok(raw.as_bool().unwrap_or(false))
}

pub fn set_filters_collapsed(db: &DbState, collapsed: bool) -> Result<(), String> {
    db::write_local_json(db, FILTERS_KEY, &json!(collapsed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_in_memory;

    #[test]
    fn test_cart_merge_and_count() {
        let db = init_in_memory().expect("db");
        add_to_cart(&db, 3, 1).expect("add");
        add_to_cart(&db, 3, 2).expect("add again");
        add_to_cart(&db, 5, 1).expect("add other");

        let cart = cart_items(&db).expect("cart");
        assert_eq!(cart.len(), 2);
        assert_eq!(cart[0], CartLine { product_id: 3, qty: 3 });
        assert_eq!(cart_count(&db).expect("count"), 4);
    }

    #[test]
    fn test_cart_qty_zero_removes_line() {
        let db = init_in_memory().expect("db");
        add_to_cart(&db, 3, 2).expect("add");
        set_cart_qty(&db, 3, 0).expect("zero");
        assert!(cart_items(&db).expect("cart").is_empty());
    }

    #[test]
    fn test_cart_survives_reload() {
        let db = init_in_memory().expect("db");
        add_to_cart(&db, 3, 2).expect("add");
        // A fresh read goes through the database, not any in-memory state.
        assert_eq!(cart_items(&db).expect("cart").len(), 1);
        clear_cart(&db).expect("clear");
        assert!(cart_items(&db).expect("cart").is_empty());
    }

    #[test]
    fn test_favorite_toggle_roundtrip() {
        let db = init_in_memory().expect("db");
        assert!(toggle_favorite(&db, 3).expect("toggle on"));
        assert_eq!(favorites(&db).expect("favs"), vec![3]);
        assert!(!toggle_favorite(&db, 3).expect("toggle off"));
        assert!(favorites(&db).expect("favs").is_empty());
    }

    #[test]
    fn test_replace_favorites_overwrites() {
        let db = init_in_memory().expect("db");
        toggle_favorite(&db, 3).expect("toggle");
        replace_favorites(&db, &[1, 5]).expect("replace");
        assert_eq!(favorites(&db).expect("favs"), vec![1, 5]);
    }

    #[test]
    fn test_rating_bounds_and_overwrite() {
        let db = init_in_memory().expect("db");
        assert!(set_rating(&db, 3, 0).is_err());
        assert!(set_rating(&db, 3, 6).is_err());

        set_rating(&db, 3, 4).expect("rate");
        set_rating(&db, 3, 5).expect("re-rate");
        assert_eq!(my_ratings(&db).expect("ratings").get(&3), Some(&5));
    }

    #[test]
    fn test_average_rating() {
        assert_eq!(average_rating(&[]), None);
        assert_eq!(average_rating(&[4, 5, 3]), Some(4.0));
    }

    #[test]
    fn test_filters_flag_default_and_set() {
        let db = init_in_memory().expect("db");
        assert!(!filters_collapsed(&db).expect("default"));
        set_filters_collapsed(&db, true).expect("set");
        assert!(filters_collapsed(&db).expect("read"));
    }
}
