use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    audit::{self, AuditEntry},
    auth::generate_order_number,
    error::{AppError, AppResult, OptionExt},
    mail,
    middleware::ip::extract_ip_from_headers,
    middleware::AuthUser,
    state::AppState,
    types::*,
};

use super::auth::{agent, fetch_user};

const PAYMENT_METHODS: [&str; 2] = ["cash", "card"];

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: String,
    order_number: String,
    customer_id: String,
    pharmacy_id: String,
    pharmacy_name: String,
    status: String,
    subtotal: f64,
    delivery_fee: f64,
    total: f64,
    payment_method: String,
    delivery_address: String,
    notes: Option<String>,
    cancel_reason: Option<String>,
    created_at: String,
    delivered_at: Option<String>,
}

const ORDER_SELECT: &str = r#"
    SELECT o.id, o.order_number, o.customer_id, o.pharmacy_id, ph.name AS pharmacy_name,
           o.status, o.subtotal, o.delivery_fee, o.total, o.payment_method,
           o.delivery_address, o.notes, o.cancel_reason, o.created_at, o.delivered_at
      FROM orders o
      JOIN pharmacies ph ON ph.id = o.pharmacy_id
"#;

fn order_dto(row: &OrderRow, items: Option<Vec<OrderItemDto>>) -> AppResult<OrderDto> {
    let parse = |s: &str, what: &str| {
        Uuid::parse_str(s).map_err(|e| AppError::Internal(anyhow::anyhow!("corrupt {} id: {}", what, e)))
    };
    Ok(OrderDto {
        id: parse(&row.id, "order")?,
        order_number: row.order_number.clone(),
        customer_id: parse(&row.customer_id, "customer")?,
        pharmacy_id: parse(&row.pharmacy_id, "pharmacy")?,
        pharmacy_name: row.pharmacy_name.clone(),
        status: row.status.clone(),
        subtotal: row.subtotal,
        delivery_fee: row.delivery_fee,
        total: row.total,
        payment_method: row.payment_method.clone(),
        delivery_address: row.delivery_address.clone(),
        notes: row.notes.clone(),
        cancel_reason: row.cancel_reason.clone(),
        created_at: row.created_at.clone(),
        delivered_at: row.delivered_at.clone(),
        items,
    })
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    id: String,
    product_id: Option<String>,
    product_name: String,
    unit_price: f64,
    quantity: i64,
}

fn order_item_dto(row: &OrderItemRow) -> AppResult<OrderItemDto> {
    let id = Uuid::parse_str(&row.id)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("corrupt order item id: {}", e)))?;
    let product_id = match &row.product_id {
        Some(pid) => Some(
            Uuid::parse_str(pid)
                .map_err(|e| AppError::Internal(anyhow::anyhow!("corrupt product id: {}", e)))?,
        ),
        None => None,
    };
    Ok(OrderItemDto {
        id,
        product_id,
        product_name: row.product_name.clone(),
        unit_price: row.unit_price,
        quantity: row.quantity,
        line_total: row.unit_price * row.quantity as f64,
    })
}

async fn load_items(db: &sqlx::SqlitePool, order_id: &str) -> AppResult<Vec<OrderItemDto>> {
    let rows: Vec<OrderItemRow> = sqlx::query_as(
        "SELECT id, product_id, product_name, unit_price, quantity FROM order_items WHERE order_id = ?1",
    )
    .bind(order_id)
    .fetch_all(db)
    .await?;
    rows.iter().map(order_item_dto).collect()
}

fn format_delivery_address(addr: &AddressDto) -> String {
    let mut out = format!("{}: {}, {}, {}", addr.label, addr.street, addr.district, addr.city);
    if let Some(details) = &addr.details {
        if !details.trim().is_empty() {
            out.push_str(" (");
            out.push_str(details.trim());
            out.push(')');
        }
    }
    out
}

pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Json(req): Json<CreateOrderRequest>,
) -> AppResult<impl IntoResponse> {
    user.require_role(UserRole::Customer)?;

    let payment_method = req.payment_method.as_deref().unwrap_or("cash").to_lowercase();
    if !PAYMENT_METHODS.contains(&payment_method.as_str()) {
        return Err(AppError::ValidationError {
            field: "payment_method".to_string(),
            message: format!("Payment method must be one of: {}", PAYMENT_METHODS.join(", ")),
        });
    }
    let notes = req.notes.as_deref().map(str::trim).filter(|n| !n.is_empty()).map(String::from);

    let address: Option<(String, String, String, String, Option<String>)> = sqlx::query_as(
        "SELECT label, street, district, city, details FROM user_addresses WHERE id = ?1 AND user_id = ?2",
    )
    .bind(req.address_id.to_string())
    .bind(user.id.to_string())
    .fetch_optional(&state.db)
    .await?;
    let (label, street, district, city, details) = address.ok_or_not_found("Address")?;
    let delivery_address = format_delivery_address(&AddressDto {
        id: req.address_id,
        label,
        street,
        district,
        city,
        details,
        is_primary: false,
    });

    let pharmacy: Option<(String, f64, String)> =
        sqlx::query_as("SELECT name, delivery_fee, verification_status FROM pharmacies WHERE id = ?1")
            .bind(req.pharmacy_id.to_string())
            .fetch_optional(&state.db)
            .await?;
    let (pharmacy_name, delivery_fee, verification) = pharmacy.ok_or_not_found("Pharmacy")?;
    if verification != VerificationStatus::Verified.as_str() {
        return Err(AppError::BadRequest("Pharmacy is not accepting orders".to_string()));
    }

    // Cart lines for this pharmacy only; other groups stay in the cart.
    let lines: Vec<(String, String, String, f64, i64, i64, String)> = sqlx::query_as(
        r#"SELECT c.id, c.product_id, p.name, p.price, c.quantity, p.quantity_in_stock, p.status
             FROM cart_items c
             JOIN products p ON p.id = c.product_id
            WHERE c.user_id = ?1 AND p.pharmacy_id = ?2
            ORDER BY c.created_at"#,
    )
    .bind(user.id.to_string())
    .bind(req.pharmacy_id.to_string())
    .fetch_all(&state.db)
    .await?;
    if lines.is_empty() {
        return Err(AppError::BadRequest("No cart items for this pharmacy".to_string()));
    }

    let mut subtotal = 0.0;
    for (_, _, name, price, quantity, stock, status) in &lines {
        if *status != ProductStatus::Active.as_str() && *status != ProductStatus::OutOfStock.as_str() {
            return Err(AppError::BadRequest(format!("{} is no longer available", name)));
        }
        if quantity > stock {
            return Err(AppError::BadRequest(format!("Only {} of {} in stock", stock, name)));
        }
        subtotal += price * *quantity as f64;
    }
    let total = subtotal + delivery_fee;

    let order_id = Uuid::new_v4();
    let order_number = generate_order_number();

    let mut tx = state.db.begin().await?;
    sqlx::query(
        r#"INSERT INTO orders (id, order_number, customer_id, pharmacy_id, status, subtotal,
                               delivery_fee, total, payment_method, delivery_address, notes)
           VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?7, ?8, ?9, ?10)"#,
    )
    .bind(order_id.to_string())
    .bind(&order_number)
    .bind(user.id.to_string())
    .bind(req.pharmacy_id.to_string())
    .bind(subtotal)
    .bind(delivery_fee)
    .bind(total)
    .bind(&payment_method)
    .bind(&delivery_address)
    .bind(&notes)
    .execute(&mut *tx)
    .await?;

    for (cart_id, product_id, name, price, quantity, _, _) in &lines {
        // Guarded decrement; a concurrent order may have taken the stock
        let updated = sqlx::query(
            "UPDATE products SET quantity_in_stock = quantity_in_stock - ?1
              WHERE id = ?2 AND quantity_in_stock >= ?1",
        )
        .bind(quantity)
        .bind(product_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(AppError::Conflict(format!("{} just sold out", name)));
        }
        sqlx::query(
            "UPDATE products SET status = 'out_of_stock' WHERE id = ?1 AND quantity_in_stock = 0 AND status = 'active'",
        )
        .bind(product_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO order_items (id, order_id, product_id, product_name, unit_price, quantity)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(order_id.to_string())
        .bind(product_id)
        .bind(name)
        .bind(price)
        .bind(quantity)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM cart_items WHERE id = ?1")
            .bind(cart_id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    state.metrics.inc_orders_created();
    let ip = extract_ip_from_headers(&headers, None);
    audit::record(
        &state.db,
        AuditEntry::new("order.create")
            .user(user.id)
            .target("order", order_id)
            .describe(format!("order {} at {}", order_number, pharmacy_name))
            .client(Some(ip.to_string()), agent(&headers)),
    );

    if let Ok(customer) = fetch_user(&state.db, user.id).await {
        mail::send_in_background(
            state.mailer.clone(),
            state.metrics.clone(),
            state.mailer.order_confirmation_message(
                &customer.email,
                &customer.full_name,
                &order_number,
                &pharmacy_name,
                total,
            ),
        );
    }

    let row: OrderRow = sqlx::query_as(&format!("{} WHERE o.id = ?1", ORDER_SELECT))
        .bind(order_id.to_string())
        .fetch_one(&state.db)
        .await?;
    let items = load_items(&state.db, &row.id).await?;
    Ok((StatusCode::CREATED, Json(order_dto(&row, Some(items))?)))
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub status: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(q): Query<ListOrdersQuery>,
) -> AppResult<impl IntoResponse> {
    let status = match &q.status {
        Some(s) => Some(
            OrderStatus::parse(s)
                .ok_or_else(|| AppError::InvalidInput(format!("Unknown order status: {}", s)))?,
        ),
        None => None,
    };
    let paging = Pagination { page: q.page, per_page: q.per_page };
    let (page, per_page) = paging.clamp();

    // Customers see their orders, sellers their pharmacy's, admins everything
    let (scope_col, scope_val): (&str, Option<String>) = match user.role {
        UserRole::Customer => ("o.customer_id", Some(user.id.to_string())),
        UserRole::Seller => {
            let pharmacy = super::pharmacies::own_pharmacy(&state.db, &user).await?;
            ("o.pharmacy_id", Some(pharmacy.id))
        }
        UserRole::Admin => ("", None),
    };

    let mut where_clauses: Vec<String> = Vec::new();
    if scope_val.is_some() {
        where_clauses.push(format!("{} = ?1", scope_col));
    }
    if status.is_some() {
        where_clauses.push(format!("o.status = ?{}", if scope_val.is_some() { 2 } else { 1 }));
    }
    let where_sql = if where_clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", where_clauses.join(" AND "))
    };

    let count_sql = format!(
        "SELECT COUNT(*) FROM orders o JOIN pharmacies ph ON ph.id = o.pharmacy_id{}",
        where_sql
    );
    let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql);
    if let Some(v) = &scope_val {
        count_query = count_query.bind(v.clone());
    }
    if let Some(s) = status {
        count_query = count_query.bind(s.as_str());
    }
    let (total,) = count_query.fetch_one(&state.db).await?;

    let page_sql = format!(
        "{}{} ORDER BY o.created_at DESC LIMIT ?{} OFFSET ?{}",
        ORDER_SELECT,
        where_sql,
        where_clauses.len() + 1,
        where_clauses.len() + 2
    );
    let mut page_query = sqlx::query_as::<_, OrderRow>(&page_sql);
    if let Some(v) = &scope_val {
        page_query = page_query.bind(v.clone());
    }
    if let Some(s) = status {
        page_query = page_query.bind(s.as_str());
    }
    let rows = page_query.bind(per_page).bind(paging.offset()).fetch_all(&state.db).await?;

    let items: Vec<OrderDto> = rows.iter().map(|r| order_dto(r, None)).collect::<AppResult<_>>()?;
    Ok(Json(json!({ "items": items, "page_info": PageInfo::new(page, per_page, total) })))
}

async fn fetch_order_checked(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
) -> AppResult<OrderRow> {
    let row: Option<OrderRow> = sqlx::query_as(&format!("{} WHERE o.id = ?1", ORDER_SELECT))
        .bind(order_id.to_string())
        .fetch_optional(&state.db)
        .await?;
    let row = row.ok_or_not_found("Order")?;

    let allowed = match user.role {
        UserRole::Admin => true,
        UserRole::Customer => row.customer_id == user.id.to_string(),
        UserRole::Seller => {
            let pharmacy = super::pharmacies::own_pharmacy(&state.db, user).await?;
            row.pharmacy_id == pharmacy.id
        }
    };
    if !allowed {
        return Err(AppError::NotFound("Order not found".to_string()));
    }
    Ok(row)
}

pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let row = fetch_order_checked(&state, &user, order_id).await?;
    let items = load_items(&state.db, &row.id).await?;
    Ok(Json(order_dto(&row, Some(items))?))
}

pub async fn update_status(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
    Json(req): Json<UpdateOrderStatusRequest>,
) -> AppResult<impl IntoResponse> {
    if user.role == UserRole::Customer {
        return Err(AppError::Forbidden("Only the pharmacy can update order status".to_string()));
    }
    let row = fetch_order_checked(&state, &user, order_id).await?;

    let next = OrderStatus::parse(&req.status)
        .ok_or_else(|| AppError::InvalidInput(format!("Unknown order status: {}", req.status)))?;
    if next == OrderStatus::Cancelled {
        return Err(AppError::BadRequest("Use the cancel endpoint to cancel an order".to_string()));
    }
    let current = OrderStatus::parse(&row.status)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("corrupt order status: {}", row.status)))?;
    if !current.can_transition_to(next) {
        return Err(AppError::Conflict(format!(
            "Cannot move order from {} to {}",
            current.as_str(),
            next.as_str()
        )));
    }

    // The status predicate makes the transition atomic; a concurrent update
    // that already moved the order loses here instead of skipping a step.
    let result = if next == OrderStatus::Delivered {
        sqlx::query("UPDATE orders SET status = ?1, delivered_at = ?2 WHERE id = ?3 AND status = ?4")
            .bind(next.as_str())
            .bind(fmt_ts(chrono::Utc::now()))
            .bind(&row.id)
            .bind(current.as_str())
            .execute(&state.db)
            .await?
    } else {
        sqlx::query("UPDATE orders SET status = ?1 WHERE id = ?2 AND status = ?3")
            .bind(next.as_str())
            .bind(&row.id)
            .bind(current.as_str())
            .execute(&state.db)
            .await?
    };
    if result.rows_affected() == 0 {
        return Err(AppError::Conflict("Order status changed concurrently, try again".to_string()));
    }
    if next == OrderStatus::Delivered {
        state.metrics.inc_orders_delivered();
    }

    let ip = extract_ip_from_headers(&headers, None);
    audit::record(
        &state.db,
        AuditEntry::new("order.status")
            .user(user.id)
            .target("order", &row.id)
            .old_value(json!(current.as_str()))
            .new_value(json!(next.as_str()))
            .client(Some(ip.to_string()), agent(&headers)),
    );

    let updated: OrderRow = sqlx::query_as(&format!("{} WHERE o.id = ?1", ORDER_SELECT))
        .bind(&row.id)
        .fetch_one(&state.db)
        .await?;
    Ok(Json(order_dto(&updated, None)?))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
    Json(req): Json<CancelOrderRequest>,
) -> AppResult<impl IntoResponse> {
    let reason = req.reason.trim();
    if reason.is_empty() {
        return Err(AppError::ValidationError {
            field: "reason".to_string(),
            message: "Cancellation reason is required".to_string(),
        });
    }

    let row = fetch_order_checked(&state, &user, order_id).await?;
    if user.role == UserRole::Seller {
        return Err(AppError::Forbidden("Sellers cannot cancel orders".to_string()));
    }

    let current = OrderStatus::parse(&row.status)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("corrupt order status: {}", row.status)))?;
    if !current.can_cancel() {
        return Err(AppError::Conflict(format!(
            "Cannot cancel an order that is {}",
            current.as_str()
        )));
    }

    let mut tx = state.db.begin().await?;
    // Guarded like the stock decrement at checkout: only a still-cancellable
    // order is flipped, so a concurrent delivery cannot be undone.
    let result = sqlx::query(
        "UPDATE orders SET status = 'cancelled', cancel_reason = ?1 WHERE id = ?2 AND status IN ('pending', 'confirmed')",
    )
    .bind(reason)
    .bind(&row.id)
    .execute(&mut *tx)
    .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::Conflict("Order can no longer be cancelled".to_string()));
    }

    // Return reserved stock to the shelf
    let items: Vec<(Option<String>, i64)> =
        sqlx::query_as("SELECT product_id, quantity FROM order_items WHERE order_id = ?1")
            .bind(&row.id)
            .fetch_all(&mut *tx)
            .await?;
    for (product_id, quantity) in items.into_iter().flat_map(|(p, q)| p.map(|p| (p, q))) {
        sqlx::query("UPDATE products SET quantity_in_stock = quantity_in_stock + ?1 WHERE id = ?2")
            .bind(quantity)
            .bind(&product_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE products SET status = 'active' WHERE id = ?1 AND status = 'out_of_stock' AND quantity_in_stock > 0",
        )
        .bind(&product_id)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    state.metrics.inc_orders_cancelled();
    let ip = extract_ip_from_headers(&headers, None);
    audit::record(
        &state.db,
        AuditEntry::new("order.cancel")
            .user(user.id)
            .target("order", &row.id)
            .describe(reason.to_string())
            .old_value(json!(current.as_str()))
            .new_value(json!("cancelled"))
            .client(Some(ip.to_string()), agent(&headers)),
    );

    let updated: OrderRow = sqlx::query_as(&format!("{} WHERE o.id = ?1", ORDER_SELECT))
        .bind(&row.id)
        .fetch_one(&state.db)
        .await?;
    Ok(Json(order_dto(&updated, None)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_delivery_address() {
        let addr = AddressDto {
            id: Uuid::new_v4(),
            label: "Home".to_string(),
            street: "12 Zubairi St".to_string(),
            district: "Hadda".to_string(),
            city: "Sanaa".to_string(),
            details: Some("  blue gate  ".to_string()),
            is_primary: true,
        };
        assert_eq!(
            format_delivery_address(&addr),
            "Home: 12 Zubairi St, Hadda, Sanaa (blue gate)"
        );
    }

    #[test]
    fn test_format_delivery_address_no_details() {
        let addr = AddressDto {
            id: Uuid::new_v4(),
            label: "Work".to_string(),
            street: "1 Tahrir Sq".to_string(),
            district: "Al-Tahrir".to_string(),
            city: "Sanaa".to_string(),
            details: None,
            is_primary: false,
        };
        assert_eq!(format_delivery_address(&addr), "Work: 1 Tahrir Sq, Al-Tahrir, Sanaa");
    }
}
