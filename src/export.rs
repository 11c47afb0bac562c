//! Order export surface.
//!
//! Two renderings of the same row set: a spreadsheet-friendly CSV with the
//! branded header and a computed total-sales footer, and a paginated plain
//! text report. Both run the line-item parser so historical text-only orders
//! export exactly like structured ones. Export is admin-gated.

use std::sync::Arc;
use tracing::info;

use crate::catalog::Product;
use crate::error::StoreError;
use crate::orders::Order;
use crate::parser;
use crate::state::AppState;
use crate::stats;

pub const CSV_HEADERS: [&str; 9] = [
    "م.",
    "كود الطلب",
    "التاريخ",
    "كود المنتج",
    "اسم المنتج",
    "الكمية",
    "سعر الوحدة",
    "الإجمالي",
    "الحالة",
];

/// Orders per page in the text report.
const REPORT_PAGE_SIZE: usize = 10;

#[derive(Debug, Clone)]
pub struct ExportRow {
    /// 1-based row serial; a multi-item order spans several serials.
    pub serial: usize,
    pub order_id: i64,
    pub date: String,
    pub product_code: String,
    pub product_name: String,
    pub qty: String,
    pub unit_price: String,
    pub line_total: String,
    pub status: String,
}

/// Flatten orders into export rows, one row per parsed line item.
pub fn build_rows(products: &[Product], orders: &[Order]) -> Vec<ExportRow> {
    let mut rows = Vec::new();
    for order in orders {
        for item in parser::parse(order, products) {
            rows.push(ExportRow {
                serial: rows.len() + 1,
                order_id: order.id,
                date: order.date.clone(),
                product_code: item.product_code.clone(),
                product_name: item.product_name.clone(),
                qty: item.qty.map(|q| q.to_string()).unwrap_or_default(),
                unit_price: item
                    .unit_price
                    .map(|p| format!("{p:.2}"))
                    .unwrap_or_default(),
                line_total: item
                    .line_total
                    .map(|t| format!("{t:.2}"))
                    .unwrap_or_default(),
                status: order.status.display().to_string(),
            });
        }
    }
    rows
}

/// Sum of every order's trailing total line.
fn total_sales(orders: &[Order]) -> f64 {
    orders.iter().filter_map(stats::order_total).sum()
}

/// Render the CSV document: brand title, blank row, headers, data, footer.
pub fn to_csv(brand_name: &str, rows: &[ExportRow], total: f64) -> Result<String, String> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::new());

    writer
        .write_record([format!("طلبات متجر {brand_name}")])
        .map_err(|e| e.to_string())?;
    writer.write_record([""]).map_err(|e| e.to_string())?;
    writer.write_record(CSV_HEADERS).map_err(|e| e.to_string())?;

    for row in rows {
        writer
            .write_record([
                row.serial.to_string(),
                row.order_id.to_string(),
                row.date.clone(),
                row.product_code.clone(),
                row.product_name.clone(),
                row.qty.clone(),
                row.unit_price.clone(),
                row.line_total.clone(),
                row.status.clone(),
            ])
            .map_err(|e| e.to_string())?;
    }

    let total_field = format!("{total:.2}");
    writer
        .write_record(["", "", "", "", "", "", "إجمالي المبيعات", total_field.as_str(), ""])
        .map_err(|e| e.to_string())?;

    let bytes = writer.into_inner().map_err(|e| e.to_string())?;
    String::from_utf8(bytes).map_err(|e| e.to_string())
}

/// Render the paginated plain text report.
pub fn to_report(brand_name: &str, products: &[Product], orders: &[Order]) -> String {
    let total = total_sales(orders);
    let mut out = String::new();
    out.push_str(&format!("تقرير طلبات متجر {brand_name}\n"));
    out.push_str(&format!("عدد الطلبات: {}\n", orders.len()));
    out.push_str(&"=".repeat(48));
    out.push('\n');

    for (page_index, page) in orders.chunks(REPORT_PAGE_SIZE).enumerate() {
        if page_index > 0 {
            out.push_str(&format!("\n--- صفحة {} ---\n", page_index + 1));
        }
        for (offset, order) in page.iter().enumerate() {
            let serial = page_index * REPORT_PAGE_SIZE + offset + 1;
            out.push_str(&format!(
                "\n#{serial}  {}  [{}]\n",
                order.date,
                order.status.display()
            ));
            for item in parser::parse(order, products) {
                match (item.qty, item.unit_price, item.line_total) {
                    (Some(qty), Some(unit), Some(line)) => {
                        out.push_str(&format!(
                            "  {} ({}): {qty} × {unit:.2} = {line:.2} جنيه\n",
                            item.product_name, item.product_code
                        ));
                    }
                    _ => {
                        out.push_str(&format!("  {}\n", item.product_name));
                    }
                }
            }
        }
    }

    out.push('\n');
    out.push_str(&"=".repeat(48));
    out.push_str(&format!("\nإجمالي المبيعات: {total:.2} جنيه\n"));
    out
}

/// Admin-gated CSV export over the current order store.
pub fn export_orders_csv(state: &Arc<AppState>, token: &str) -> Result<String, StoreError> {
    state.auth.validate(token)?;
    let products = state.products();
    let orders = state.cached_orders();
    let rows = build_rows(&products, &orders);
    let csv = to_csv(&state.config.brand_name, &rows, total_sales(&orders))
        .map_err(StoreError::Storage)?;
    info!(orders = orders.len(), rows = rows.len(), "Orders exported to CSV");
    Ok(csv)
}

/// Admin-gated text report over the current order store.
pub fn export_orders_report(state: &Arc<AppState>, token: &str) -> Result<String, StoreError> {
    state.auth.validate(token)?;
    let products = state.products();
    let orders = state.cached_orders();
    Ok(to_report(&state.config.brand_name, &products, &orders))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::bundled_products;
    use crate::orders::{MirrorStatus, OrderStatus};
    use crate::state::tests::test_state;

    fn order(id: i64, details: &str) -> Order {
        Order {
            id,
            date: "24/08/2026, 14:03:00".to_string(),
            details: details.to_string(),
            items: Vec::new(),
            record_version: 1,
            status: OrderStatus::Pending,
            remote_key: None,
            mirror_status: MirrorStatus::Pending,
        }
    }

    const DETAILS: &str =
        "كود المنتج: 301\n- 2 × 55 جنيه = 110.00 جنيه\n\n*الإجمالي:* 110.00 جنيه";

    #[test]
    fn test_rows_are_numbered_sequentially() {
        let products = bundled_products();
        let multi = "كود المنتج: 301\n- 1 × 55 جنيه = 55.00 جنيه\n\
                     كود المنتج: CS005\n- 2 × 30 جنيه = 60.00 جنيه";
        let orders = vec![order(1000, DETAILS), order(2000, multi)];

        let rows = build_rows(&products, &orders);
        assert_eq!(rows.len(), 3);
        // Each exported row gets its own serial, across order boundaries.
        assert_eq!(rows[0].serial, 1);
        assert_eq!(rows[1].serial, 2);
        assert_eq!(rows[2].serial, 3);
        assert_eq!(rows[1].order_id, rows[2].order_id);
        assert_eq!(rows[1].product_name, "مقلمة");
    }

    #[test]
    fn test_csv_has_brand_header_and_total_footer() {
        let products = bundled_products();
        let orders = vec![order(1000, DETAILS)];
        let rows = build_rows(&products, &orders);

        let csv = to_csv("MAHFOOR CNC", &rows, 110.0).expect("render");
        let lines: Vec<&str> = csv.lines().collect();
        assert!(lines[0].contains("MAHFOOR CNC"));
        assert!(lines[2].contains("كود الطلب"));
        assert!(lines.last().unwrap().contains("110.00"));
    }

    #[test]
    fn test_fallback_rows_export_with_empty_numbers() {
        let products = bundled_products();
        let orders = vec![order(1000, "ملاحظة حرة")];
        let rows = build_rows(&products, &orders);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].qty.is_empty());
        assert_eq!(rows[0].product_name, "ملاحظة حرة");
    }

    #[test]
    fn test_report_paginates() {
        let products = bundled_products();
        let orders: Vec<Order> = (0..12).map(|i| order(1000 + i, DETAILS)).collect();
        let report = to_report("MAHFOOR CNC", &products, &orders);
        assert!(report.contains("عدد الطلبات: 12"));
        assert!(report.contains("--- صفحة 2 ---"));
        assert!(report.contains("إجمالي المبيعات: 1320.00 جنيه"));
    }

    #[test]
    fn test_export_requires_session() {
        let state = test_state();
        assert!(matches!(
            export_orders_csv(&state, "nope").unwrap_err(),
            StoreError::Unauthorized
        ));

        let token = state
            .auth
            .login(&state.db, &state.config.admin_secret)
            .expect("login");
        let csv = export_orders_csv(&state, &token).expect("export");
        assert!(csv.contains("طلبات متجر"));
    }
}
