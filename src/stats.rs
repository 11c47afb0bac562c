//! Monthly statistics aggregator.
//!
//! Runs the line-item parser over every stored order and buckets quantities
//! and revenue per product, with a calendar-month window around a reference
//! date. Total sales is computed independently from each order's trailing
//! total line; on orders with shipping or manual adjustments it legitimately
//! differs from summed line revenue, so both figures are surfaced.

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, TimeZone};
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::catalog::Product;
use crate::orders::Order;
use crate::parser;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSales {
    pub product_code: String,
    pub product_name: String,
    pub total_qty: u64,
    pub total_revenue: f64,
    pub monthly_qty: u64,
    pub monthly_revenue: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReport {
    pub per_product: Vec<ProductSales>,
    /// Sum of each order's trailing total line.
    pub total_sales: f64,
    pub order_count: usize,
    /// Product with the highest cumulative quantity. Ties break by code
    /// ascending.
    pub top_product: Option<ProductSales>,
}

/// Ids below this are not plausible millisecond timestamps; fall back to
/// parsing the display date for those records.
const MIN_PLAUSIBLE_TS_MS: i64 = 1_000_000_000_000;

fn total_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*الإجمالي:\* ([\d.]+) جنيه").unwrap())
}

fn display_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(\d{1,2})[/\-](\d{1,2})[/\-](\d{2,4})(?:[,\s]+(\d{1,2}):(\d{2})(?::(\d{2}))?)?",
        )
        .unwrap()
    })
}

/// Normalize Arabic-Indic digits and the Arabic comma so the locale-formatted
/// display dates of historical records parse with one regex.
fn normalize_date_text(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            '٠'..='٩' => char::from(b'0' + (c as u32 - '٠' as u32) as u8),
            '،' => ',',
            _ => c,
        })
        .collect()
}

/// Parse a display date like "24/08/2026, 14:03:00" (time optional,
/// two-digit years promoted to 2000+).
pub fn parse_display_date(raw: &str) -> Option<NaiveDateTime> {
    let normalized = normalize_date_text(raw);
    let caps = display_date_re().captures(&normalized)?;

    let day: u32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let mut year: i32 = caps[3].parse().ok()?;
    if year < 100 {
        year += 2000;
    }

    let hour: u32 = caps.get(4).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
    let minute: u32 = caps.get(5).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
    let second: u32 = caps.get(6).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);

    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
}

/// Effective date of an order: the id as a millisecond timestamp when
/// plausible, else the parsed display date, else none (the order is then
/// excluded from the monthly bucket only). The timestamp resolves in local
/// time, the same zone the display date was stamped in, so the two paths
/// agree on the calendar month.
pub fn effective_date(order: &Order) -> Option<NaiveDateTime> {
    if order.id >= MIN_PLAUSIBLE_TS_MS {
        if let Some(dt) = Local.timestamp_millis_opt(order.id).single() {
            return Some(dt.naive_local());
        }
    }
    parse_display_date(&order.date)
}

/// Total from the order's trailing total line, if present.
pub fn order_total(order: &Order) -> Option<f64> {
    total_line_re()
        .captures(&order.details)
        .and_then(|caps| caps[1].parse::<f64>().ok())
}

/// Aggregate sales statistics across all orders. `reference` fixes the
/// calendar month of the monthly bucket.
pub fn aggregate(products: &[Product], orders: &[Order], reference: NaiveDate) -> StatsReport {
    let mut per_product: HashMap<String, ProductSales> = HashMap::new();
    let mut total_sales = 0.0;

    for order in orders {
        let in_month = effective_date(order)
            .map(|dt| dt.year() == reference.year() && dt.month() == reference.month())
            .unwrap_or(false);

        for item in parser::parse(order, products) {
            let (Some(qty), Some(line_total)) = (item.qty, item.line_total) else {
                continue;
            };
            let entry = per_product
                .entry(item.product_code.clone())
                .or_insert_with(|| ProductSales {
                    product_code: item.product_code.clone(),
                    product_name: item.product_name.clone(),
                    ..Default::default()
                });
            entry.total_qty += u64::from(qty);
            entry.total_revenue += line_total;
            if in_month {
                entry.monthly_qty += u64::from(qty);
                entry.monthly_revenue += line_total;
            }
        }

        if let Some(total) = order_total(order) {
            total_sales += total;
        }
    }

    let mut per_product: Vec<ProductSales> = per_product.into_values().collect();
    per_product.sort_by(|a, b| {
        b.total_qty
            .cmp(&a.total_qty)
            .then_with(|| a.product_code.cmp(&b.product_code))
    });

    let top_product = per_product
        .first()
        .filter(|p| p.total_qty > 0)
        .cloned();

    StatsReport {
        top_product,
        total_sales,
        order_count: orders.len(),
        per_product,
    }
}

/// The N best-selling products by cumulative quantity.
pub fn top_products(report: &StatsReport, n: usize) -> Vec<&ProductSales> {
    report.per_product.iter().take(n).collect()
}
