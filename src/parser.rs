//! Free-text line-item parser.
//!
//! Historical orders carry their line items only inside the Arabic detail
//! text. This parser recovers structured rows from that text so the stats
//! aggregator and the export surface work over every order ever stored.
//! Orders written by the composer also carry structured `items`, but the
//! parser contract must hold for composer output too.

use regex::Regex;
use std::sync::OnceLock;

use crate::catalog::{self, Product};
use crate::orders::Order;

/// One recovered row. Quantity and prices are `None` on the fallback row.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedItem {
    pub product_code: String,
    pub product_name: String,
    pub qty: Option<u32>,
    pub unit_price: Option<f64>,
    pub line_total: Option<f64>,
}

/// Marker that introduces a product code line.
const CODE_MARKER: &str = "كود المنتج:";

fn qty_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^-?\s*(\d+) × ([\d.]+) جنيه = ([\d.]+) جنيه").unwrap()
    })
}

/// Parse the order's detail text into line items.
///
/// Scan algorithm: a code line loads a single-slot register; the next
/// quantity line consumes it into a row and clears it. A quantity line with
/// no code in the register is dropped silently. When zero rows parse, one
/// fallback row carries the entire detail text (newlines collapsed to
/// spaces) as the product name.
pub fn parse(order: &Order, products: &[Product]) -> Vec<ParsedItem> {
    let mut items = Vec::new();
    let mut current_code: Option<String> = None;

    for line in order.details.lines() {
        let trimmed = line.trim();

        if trimmed.contains(CODE_MARKER) {
            current_code = trimmed
                .splitn(2, ':')
                .nth(1)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty());
            continue;
        }

        if let Some(caps) = qty_line_re().captures(trimmed) {
            let code = match current_code.take() {
                Some(c) => c,
                None => continue,
            };
            let qty = caps[1].parse::<u32>().ok();
            let unit_price = caps[2].parse::<f64>().ok();
            let line_total = caps[3].parse::<f64>().ok();
            let product_name = catalog::find_by_code(products, &code)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| code.clone());
            items.push(ParsedItem {
                product_code: code,
                product_name,
                qty,
                unit_price,
                line_total,
            });
        }
    }

    if items.is_empty() {
        items.push(ParsedItem {
            product_code: String::new(),
            product_name: order.details.replace('\n', " "),
            qty: None,
            unit_price: None,
            line_total: None,
        });
    }

    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::bundled_products;
    use crate::orders::{MirrorStatus, OrderStatus};

    fn order_with_details(details: &str) -> Order {
        Order {
            id: 1_700_000_000_000,
            date: "24/08/2026, 14:03:00".to_string(),
            details: details.to_string(),
            items: Vec::new(),
            record_version: 1,
            status: OrderStatus::Pending,
            remote_key: None,
            mirror_status: MirrorStatus::Pending,
        }
    }

    #[test]
    fn test_single_item_order() {
        let details = "*طلب جديد من متجر MAHFOOR CNC*\n\n\
                       *الاسم:* أحمد\n*العنوان:* القاهرة\n*رقم الهاتف:* 01012345678\n\n\
                       *المنتج:* مقلمة\nكود المنتج: 301\n- 2 × 55 جنيه = 110.00 جنيه\n\n\
                       *الإجمالي:* 110.00 جنيه";
        let items = parse(&order_with_details(details), &bundled_products());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].product_code, "301");
        assert_eq!(items[0].product_name, "مقلمة");
        assert_eq!(items[0].qty, Some(2));
        assert_eq!(items[0].unit_price, Some(55.0));
        assert_eq!(items[0].line_total, Some(110.0));
    }

    #[test]
    fn test_multi_item_order() {
        let details = "*المنتجات:*\n\
                       كود المنتج: 301\n- 1 × 55 جنيه = 55.00 جنيه\n\
                       كود المنتج: CS005\n- 3 × 30 جنيه = 90.00 جنيه\n\n\
                       *الإجمالي:* 145.00 جنيه";
        let items = parse(&order_with_details(details), &bundled_products());
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].product_code, "301");
        assert_eq!(items[1].product_code, "CS005");
        assert_eq!(items[1].product_name, "كوستر");
        assert_eq!(items[1].qty, Some(3));
    }

    #[test]
    fn test_orphan_quantity_line_is_dropped() {
        // Quantity line with no preceding code marker parses nothing, so
        // the fallback row fires.
        let details = "- 2 × 55 جنيه = 110.00 جنيه";
        let items = parse(&order_with_details(details), &bundled_products());
        assert_eq!(items.len(), 1);
        assert!(items[0].product_code.is_empty());
        assert_eq!(items[0].qty, None);
    }

    #[test]
    fn test_code_register_is_consumed_once() {
        // One code, two quantity lines: second line has no code, dropped.
        let details = "كود المنتج: 301\n\
                       - 1 × 55 جنيه = 55.00 جنيه\n\
                       - 2 × 55 جنيه = 110.00 جنيه";
        let items = parse(&order_with_details(details), &bundled_products());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].qty, Some(1));
    }

    #[test]
    fn test_unknown_code_falls_back_to_raw_code() {
        let details = "كود المنتج: ZZZ9\n- 1 × 10 جنيه = 10.00 جنيه";
        let items = parse(&order_with_details(details), &bundled_products());
        assert_eq!(items[0].product_name, "ZZZ9");
    }

    #[test]
    fn test_fallback_row_collapses_newlines() {
        let details = "شحن مخصص\nبدون منتجات";
        let items = parse(&order_with_details(details), &bundled_products());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].product_name, "شحن مخصص بدون منتجات");
        assert!(items[0].product_code.is_empty());
    }

    #[test]
    fn test_parse_is_idempotent() {
        let details = "كود المنتج: 301\n- 2 × 55 جنيه = 110.00 جنيه";
        let order = order_with_details(details);
        let first = parse(&order, &bundled_products());
        let second = parse(&order, &bundled_products());
        assert_eq!(first, second);
    }
}
