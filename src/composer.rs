//! Order composer.
//!
//! Turns a checkout request into the canonical Arabic order message, the
//! durable local record, the best-effort mirror write, the pending loyalty
//! entry, and the WhatsApp handoff URL. Validation is all-or-nothing: the
//! first rejection returns before anything is persisted.

use chrono::Local;
use std::sync::Arc;
use tracing::{info, warn};

use crate::catalog;
use crate::error::{StoreError, ValidationError};
use crate::ledger::{self, PendingEntry};
use crate::orders::{MirrorStatus, Order, OrderItem, OrderStatus, ITEMS_RECORD_VERSION};
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct CustomerInfo {
    pub full_name: String,
    pub address: String,
    /// Optional pickup-location link, rendered only when present.
    pub location_link: Option<String>,
    pub phone: String,
}

#[derive(Debug, Clone)]
pub struct RequestLine {
    pub product_id: i64,
    pub qty: u32,
}

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub customer: CustomerInfo,
    pub lines: Vec<RequestLine>,
}

/// What a successful checkout hands back to the caller.
#[derive(Debug, Clone)]
pub struct Checkout {
    pub order: Order,
    pub whatsapp_url: String,
    pub points_enqueued: bool,
}

/// Unit prices print whole when whole, otherwise with two decimals. Line and
/// grand totals always print with two decimals.
fn format_unit_price(price: f64) -> String {
    if (price - price.trunc()).abs() < 1e-9 {
        format!("{}", price.trunc() as i64)
    } else {
        format!("{price:.2}")
    }
}

fn validate(req: &OrderRequest) -> Result<(), ValidationError> {
    if req.customer.full_name.trim().is_empty() {
        return Err(ValidationError::MissingField("name"));
    }
    if req.customer.address.trim().is_empty() {
        return Err(ValidationError::MissingField("address"));
    }
    if req.customer.phone.trim().is_empty() {
        return Err(ValidationError::MissingField("phone"));
    }
    if req.lines.is_empty() {
        return Err(ValidationError::MissingField("products"));
    }

    let phone = req.customer.phone.trim();
    if phone.len() != 11 || !phone.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidPhoneFormat);
    }
    Ok(())
}

/// Render the canonical detail text. The markers and line shapes here are a
/// wire format: the parser and the stats aggregator both key off them.
fn render_details(brand_name: &str, customer: &CustomerInfo, items: &[OrderItem], total: f64) -> String {
    let mut out = String::new();
    out.push_str(&format!("*طلب جديد من متجر {brand_name}*\n\n"));
    out.push_str(&format!("*الاسم:* {}\n", customer.full_name.trim()));
    out.push_str(&format!("*العنوان:* {}\n", customer.address.trim()));
    if let Some(link) = customer.location_link.as_deref().map(str::trim) {
        if !link.is_empty() {
            out.push_str(&format!("*لوكيشن استلام الاوردر:* {link}\n"));
        }
    }
    out.push_str(&format!("*رقم الهاتف:* {}\n\n", customer.phone.trim()));

    if items.len() == 1 {
        let item = &items[0];
        out.push_str(&format!("*المنتج:* {}\n", item.product_name));
        out.push_str(&format!("كود المنتج: {}\n", item.product_code));
        out.push_str(&format!(
            "- {} × {} جنيه = {:.2} جنيه\n",
            item.qty,
            format_unit_price(item.unit_price),
            item.line_total
        ));
    } else {
        out.push_str("*المنتجات:*\n");
        for item in items {
            out.push_str(&format!("\n{}\n", item.product_name));
            out.push_str(&format!("كود المنتج: {}\n", item.product_code));
            out.push_str(&format!(
                "- {} × {} جنيه = {:.2} جنيه\n",
                item.qty,
                format_unit_price(item.unit_price),
                item.line_total
            ));
        }
    }

    out.push_str(&format!("\n*الإجمالي:* {total:.2} جنيه"));
    out
}

/// Build the `wa.me` handoff URL for an order's detail text.
pub fn whatsapp_url(number: &str, details: &str) -> String {
    let digits: String = number.chars().filter(|c| c.is_ascii_digit()).collect();
    format!("https://wa.me/{digits}?text={}", urlencoding::encode(details))
}

/// Open the handoff URL in the default browser. Separate from `submit` so
/// callers decide when (and whether) the handoff happens.
pub fn open_whatsapp(url: &str) -> Result<(), String> {
    webbrowser::open(url).map_err(|e| format!("open browser: {e}"))
}

/// Submit a checkout.
///
/// Side effects, in order: durable local append, fire-and-forget mirror
/// write, pending loyalty entry when the rounded total is positive. The
/// returned URL is not opened here.
pub fn submit(state: &Arc<AppState>, req: &OrderRequest) -> Result<Checkout, StoreError> {
    validate(req)?;

    let products = state.products();
    let mut items = Vec::with_capacity(req.lines.len());
    for line in &req.lines {
        let product = catalog::find_by_id(&products, line.product_id)
            .ok_or_else(|| ValidationError::ProductUnavailable(line.product_id.to_string()))?;
        if !product.available {
            return Err(ValidationError::ProductUnavailable(product.name.clone()).into());
        }
        let qty = line.qty.max(1);
        let unit_price = product.effective_price();
        items.push(OrderItem {
            product_code: product.code.clone(),
            product_name: product.name.clone(),
            qty,
            unit_price,
            line_total: unit_price * f64::from(qty),
        });
    }

    let total: f64 = items.iter().map(|i| i.line_total).sum();
    let details = render_details(&state.config.brand_name, &req.customer, &items, total);

    let now = Local::now();
    let order = Order {
        id: now.timestamp_millis(),
        date: now.format("%d/%m/%Y, %H:%M:%S").to_string(),
        details: details.clone(),
        items,
        record_version: ITEMS_RECORD_VERSION,
        status: OrderStatus::Pending,
        remote_key: None,
        mirror_status: MirrorStatus::Pending,
    };

    // Local persistence is best-effort on this path: a storage failure is
    // logged and the checkout still completes.
    if let Err(e) = state.append_order(order.clone()) {
        warn!(order_id = order.id, "Order not persisted locally: {e}");
    }

    // Mirror write never blocks checkout. Without a runtime the order stays
    // mirror_status = pending for the drain worker.
    if let (Some(mirror), Ok(handle)) = (
        state.mirror.clone(),
        tokio::runtime::Handle::try_current(),
    ) {
        let db_state = Arc::clone(state);
        let to_mirror = order.clone();
        handle.spawn(async move {
            match mirror.save_order(&to_mirror).await {
                Ok(key) => {
                    let _ = crate::orders::set_mirror_result(
                        &db_state.db,
                        to_mirror.id,
                        MirrorStatus::Mirrored,
                        Some(&key),
                        None,
                    );
                }
                Err(e) => {
                    warn!(order_id = to_mirror.id, "Mirror write failed: {e}");
                    let _ = crate::orders::set_mirror_result(
                        &db_state.db,
                        to_mirror.id,
                        MirrorStatus::Pending,
                        None,
                        Some(&e.to_string()),
                    );
                }
            }
        });
    }

    let points = ledger::points_for_total(total);
    let points_enqueued = if points > 0 {
        let entry = PendingEntry {
            order_id: order.id,
            phone: req.customer.phone.trim().to_string(),
            customer_name: req.customer.full_name.trim().to_string(),
            points,
            amount: total,
            date: order.date.clone(),
        };
        match ledger::enqueue_pending(&state.db, &entry) {
            Ok(()) => true,
            Err(e) => {
                warn!(order_id = order.id, "Pending points not enqueued: {e}");
                false
            }
        }
    } else {
        false
    };

    let url = whatsapp_url(&state.config.whatsapp_number, &details);
    info!(order_id = order.id, total, points, "Order submitted");

    Ok(Checkout {
        order,
        whatsapp_url: url,
        points_enqueued,
    })
}

/// Check out the stored cart. On success the cart is emptied; a validation
/// failure leaves it untouched.
pub fn submit_cart(state: &Arc<AppState>, customer: CustomerInfo) -> Result<Checkout, StoreError> {
    let cart = crate::shopper::cart_items(&state.db).map_err(StoreError::Storage)?;
    let lines = cart
        .iter()
        .map(|l| RequestLine {
            product_id: l.product_id,
            qty: l.qty,
        })
        .collect();

    let checkout = submit(state, &OrderRequest { customer, lines })?;

    if let Err(e) = crate::shopper::clear_cart(&state.db) {
        warn!("Cart not cleared after checkout: {e}");
    }
    Ok(checkout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger;
    use crate::parser;
    use crate::shopper;
    use crate::state::tests::test_state;

    fn request(lines: Vec<RequestLine>) -> OrderRequest {
        OrderRequest {
            customer: CustomerInfo {
                full_name: "أحمد علي".to_string(),
                address: "القاهرة، مدينة نصر".to_string(),
                location_link: None,
                phone: "01012345678".to_string(),
            },
            lines,
        }
    }

    #[test]
    fn test_single_item_message_shape() {
        let state = test_state();
        // Product 3 is "مقلمة" at 55.
        let checkout =
            submit(&state, &request(vec![RequestLine { product_id: 3, qty: 2 }])).expect("submit");

        let details = &checkout.order.details;
        assert!(details.starts_with("*طلب جديد من متجر MAHFOOR CNC*\n\n"));
        assert!(details.contains("*الاسم:* أحمد علي\n"));
        assert!(details.contains("*رقم الهاتف:* 01012345678\n"));
        assert!(details.contains("*المنتج:* مقلمة\n"));
        assert!(details.contains("كود المنتج: 301\n"));
        assert!(details.contains("- 2 × 55 جنيه = 110.00 جنيه"));
        assert!(details.ends_with("*الإجمالي:* 110.00 جنيه"));
        assert!(!details.contains("لوكيشن"));
    }

    #[test]
    fn test_location_link_renders_when_present() {
        let state = test_state();
        let mut req = request(vec![RequestLine { product_id: 3, qty: 1 }]);
        req.customer.location_link = Some("https://maps.example/xyz".to_string());

        let checkout = submit(&state, &req).expect("submit");
        assert!(checkout
            .order
            .details
            .contains("*لوكيشن استلام الاوردر:* https://maps.example/xyz\n"));
    }

    #[test]
    fn test_multi_item_cart_checkout() {
        let state = test_state();
        let checkout = submit(
            &state,
            &request(vec![
                RequestLine { product_id: 3, qty: 1 },
                RequestLine { product_id: 5, qty: 3 },
            ]),
        )
        .expect("submit");

        let details = &checkout.order.details;
        assert!(details.contains("*المنتجات:*"));
        assert!(details.contains("كود المنتج: 301"));
        assert!(details.contains("كود المنتج: CS005"));
        // 55 + 3 × 30 = 145
        assert!(details.ends_with("*الإجمالي:* 145.00 جنيه"));

        // Composer output satisfies the parser contract.
        let parsed = parser::parse(&checkout.order, &state.products());
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].qty, Some(3));
    }

    #[test]
    fn test_validation_rejects_before_any_persistence() {
        let state = test_state();

        let mut req = request(vec![RequestLine { product_id: 3, qty: 1 }]);
        req.customer.full_name = "   ".to_string();
        assert!(matches!(
            submit(&state, &req).unwrap_err(),
            StoreError::Validation(ValidationError::MissingField("name"))
        ));

        let mut req = request(vec![RequestLine { product_id: 3, qty: 1 }]);
        req.customer.phone = "0101234567".to_string(); // 10 digits
        assert!(matches!(
            submit(&state, &req).unwrap_err(),
            StoreError::Validation(ValidationError::InvalidPhoneFormat)
        ));

        let mut req = request(vec![RequestLine { product_id: 3, qty: 1 }]);
        req.customer.phone = "0101234567x".to_string();
        assert!(matches!(
            submit(&state, &req).unwrap_err(),
            StoreError::Validation(ValidationError::InvalidPhoneFormat)
        ));

        let req = request(vec![RequestLine { product_id: 999, qty: 1 }]);
        assert!(matches!(
            submit(&state, &req).unwrap_err(),
            StoreError::Validation(ValidationError::ProductUnavailable(_))
        ));

        // Nothing was stored by any of the rejected submissions.
        assert!(state.cached_orders().is_empty());
        assert!(ledger::list_pending(&state.db).expect("pending").is_empty());
    }

    #[test]
    fn test_unavailable_product_rejected() {
        let state = test_state();
        let mut products = state.products();
        products[2].available = false; // id 3
        state.set_products(products).expect("set products");

        let err = submit(&state, &request(vec![RequestLine { product_id: 3, qty: 1 }]))
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Validation(ValidationError::ProductUnavailable(_))
        ));
    }

    #[test]
    fn test_submit_enqueues_points_for_positive_total() {
        let state = test_state();
        let checkout =
            submit(&state, &request(vec![RequestLine { product_id: 3, qty: 2 }])).expect("submit");
        assert!(checkout.points_enqueued);

        let pending = ledger::list_pending(&state.db).expect("pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].points, 110);
        assert_eq!(pending[0].phone, "01012345678");
        assert_eq!(pending[0].order_id, checkout.order.id);
    }

    #[test]
    fn test_cart_checkout_clears_cart_on_success() {
        let state = test_state();
        shopper::add_to_cart(&state.db, 3, 1).expect("add");
        shopper::add_to_cart(&state.db, 5, 3).expect("add");

        let checkout = submit_cart(&state, request(vec![]).customer).expect("checkout");
        assert!(checkout.order.details.contains("*المنتجات:*"));
        assert!(shopper::cart_items(&state.db).expect("cart").is_empty());
    }

    #[test]
    fn test_empty_cart_checkout_rejected_and_cart_untouched() {
        let state = test_state();
        let err = submit_cart(&state, request(vec![]).customer).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Validation(ValidationError::MissingField("products"))
        ));
    }

    #[test]
    fn test_whatsapp_url_is_percent_encoded() {
        let url = whatsapp_url("+201033662370", "*الإجمالي:* 110.00 جنيه");
        assert!(url.starts_with("https://wa.me/201033662370?text="));
        assert!(!url.contains(' '));
        assert!(!url.contains('*'));
        assert!(url.contains("%2A")); // encoded asterisk
    }

    #[test]
    fn test_discount_flows_into_unit_price() {
        let state = test_state();
        let mut products = state.products();
        products[2].discount = 20.0; // 55 -> 44
        state.set_products(products).expect("set products");

        let checkout =
            submit(&state, &request(vec![RequestLine { product_id: 3, qty: 1 }])).expect("submit");
        assert!(checkout.order.details.contains("- 1 × 44 جنيه = 44.00 جنيه"));
    }
}
