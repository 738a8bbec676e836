use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult, OptionExt},
    middleware::AuthUser,
    state::AppState,
    types::*,
};

const MAX_QUANTITY_PER_ITEM: i64 = 100;

#[derive(sqlx::FromRow)]
struct CartRow {
    id: String,
    product_id: String,
    product_name: String,
    unit_price: f64,
    quantity: i64,
    available_stock: i64,
    pharmacy_id: String,
    pharmacy_name: String,
    delivery_fee: f64,
}

const CART_QUERY: &str = r#"
    SELECT c.id, c.product_id, p.name AS product_name, p.price AS unit_price,
           c.quantity, p.quantity_in_stock AS available_stock,
           ph.id AS pharmacy_id, ph.name AS pharmacy_name, ph.delivery_fee
      FROM cart_items c
      JOIN products p ON p.id = c.product_id
      JOIN pharmacies ph ON ph.id = p.pharmacy_id
     WHERE c.user_id = ?1
     ORDER BY ph.name, c.created_at
"#;

fn build_cart(rows: &[CartRow]) -> AppResult<CartDto> {
    let mut groups: Vec<CartGroupDto> = Vec::new();
    let mut item_count = 0i64;
    for row in rows {
        let pharmacy_id = Uuid::parse_str(&row.pharmacy_id)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("corrupt pharmacy id: {}", e)))?;
        let item = CartItemDto {
            id: Uuid::parse_str(&row.id)
                .map_err(|e| AppError::Internal(anyhow::anyhow!("corrupt cart item id: {}", e)))?,
            product_id: Uuid::parse_str(&row.product_id)
                .map_err(|e| AppError::Internal(anyhow::anyhow!("corrupt product id: {}", e)))?,
            product_name: row.product_name.clone(),
            unit_price: row.unit_price,
            quantity: row.quantity,
            line_total: row.unit_price * row.quantity as f64,
            available_stock: row.available_stock,
        };
        item_count += row.quantity;

        // Rows arrive ordered by pharmacy, so the open group is always last
        match groups.last_mut() {
            Some(group) if group.pharmacy_id == pharmacy_id => {
                group.subtotal += item.line_total;
                group.items.push(item);
            }
            _ => {
                groups.push(CartGroupDto {
                    pharmacy_id,
                    pharmacy_name: row.pharmacy_name.clone(),
                    delivery_fee: row.delivery_fee,
                    subtotal: item.line_total,
                    items: vec![item],
                });
            }
        }
    }
    let total = groups.iter().map(|g| g.subtotal + g.delivery_fee).sum();
    Ok(CartDto { groups, item_count, total })
}

pub async fn get_cart(State(state): State<AppState>, user: AuthUser) -> AppResult<impl IntoResponse> {
    user.require_role(UserRole::Customer)?;
    let rows: Vec<CartRow> = sqlx::query_as(CART_QUERY)
        .bind(user.id.to_string())
        .fetch_all(&state.db)
        .await?;
    Ok(Json(build_cart(&rows)?))
}

pub async fn cart_count(State(state): State<AppState>, user: AuthUser) -> AppResult<impl IntoResponse> {
    user.require_role(UserRole::Customer)?;
    let (count,): (i64,) =
        sqlx::query_as("SELECT COALESCE(SUM(quantity), 0) FROM cart_items WHERE user_id = ?1")
            .bind(user.id.to_string())
            .fetch_one(&state.db)
            .await?;
    Ok(Json(json!({ "count": count })))
}

pub async fn add_item(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<AddCartItemRequest>,
) -> AppResult<impl IntoResponse> {
    user.require_role(UserRole::Customer)?;
    if req.quantity < 1 || req.quantity > MAX_QUANTITY_PER_ITEM {
        return Err(AppError::ValidationError {
            field: "quantity".to_string(),
            message: format!("Quantity must be between 1 and {}", MAX_QUANTITY_PER_ITEM),
        });
    }

    let product: Option<(i64, String, String)> = sqlx::query_as(
        r#"SELECT p.quantity_in_stock, p.status, ph.verification_status
             FROM products p JOIN pharmacies ph ON ph.id = p.pharmacy_id
            WHERE p.id = ?1"#,
    )
    .bind(req.product_id.to_string())
    .fetch_optional(&state.db)
    .await?;
    let (stock, status, verification) = product.ok_or_not_found("Product")?;
    if status != ProductStatus::Active.as_str() || verification != VerificationStatus::Verified.as_str() {
        return Err(AppError::BadRequest("Product is not available".to_string()));
    }

    let existing: Option<(String, i64)> =
        sqlx::query_as("SELECT id, quantity FROM cart_items WHERE user_id = ?1 AND product_id = ?2")
            .bind(user.id.to_string())
            .bind(req.product_id.to_string())
            .fetch_optional(&state.db)
            .await?;

    let new_quantity = existing.as_ref().map_or(req.quantity, |(_, q)| q + req.quantity);
    if new_quantity > stock {
        return Err(AppError::BadRequest(format!("Only {} in stock", stock)));
    }
    if new_quantity > MAX_QUANTITY_PER_ITEM {
        return Err(AppError::BadRequest(format!(
            "Cannot hold more than {} of one product",
            MAX_QUANTITY_PER_ITEM
        )));
    }

    match existing {
        Some((id, _)) => {
            sqlx::query("UPDATE cart_items SET quantity = ?1 WHERE id = ?2")
                .bind(new_quantity)
                .bind(&id)
                .execute(&state.db)
                .await?;
        }
        None => {
            sqlx::query(
                "INSERT INTO cart_items (id, user_id, product_id, quantity) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(user.id.to_string())
            .bind(req.product_id.to_string())
            .bind(new_quantity)
            .execute(&state.db)
            .await?;
        }
    }

    let rows: Vec<CartRow> = sqlx::query_as(CART_QUERY)
        .bind(user.id.to_string())
        .fetch_all(&state.db)
        .await?;
    Ok((StatusCode::CREATED, Json(build_cart(&rows)?)))
}

pub async fn update_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<Uuid>,
    Json(req): Json<UpdateCartItemRequest>,
) -> AppResult<impl IntoResponse> {
    user.require_role(UserRole::Customer)?;
    if req.quantity < 1 || req.quantity > MAX_QUANTITY_PER_ITEM {
        return Err(AppError::ValidationError {
            field: "quantity".to_string(),
            message: format!("Quantity must be between 1 and {}", MAX_QUANTITY_PER_ITEM),
        });
    }

    let row: Option<(i64,)> = sqlx::query_as(
        r#"SELECT p.quantity_in_stock FROM cart_items c
             JOIN products p ON p.id = c.product_id
            WHERE c.id = ?1 AND c.user_id = ?2"#,
    )
    .bind(item_id.to_string())
    .bind(user.id.to_string())
    .fetch_optional(&state.db)
    .await?;
    let (stock,) = row.ok_or_not_found("Cart item")?;
    if req.quantity > stock {
        return Err(AppError::BadRequest(format!("Only {} in stock", stock)));
    }

    sqlx::query("UPDATE cart_items SET quantity = ?1 WHERE id = ?2 AND user_id = ?3")
        .bind(req.quantity)
        .bind(item_id.to_string())
        .bind(user.id.to_string())
        .execute(&state.db)
        .await?;

    let rows: Vec<CartRow> = sqlx::query_as(CART_QUERY)
        .bind(user.id.to_string())
        .fetch_all(&state.db)
        .await?;
    Ok(Json(build_cart(&rows)?))
}

pub async fn remove_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    user.require_role(UserRole::Customer)?;
    let result = sqlx::query("DELETE FROM cart_items WHERE id = ?1 AND user_id = ?2")
        .bind(item_id.to_string())
        .bind(user.id.to_string())
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Cart item not found".to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn clear_cart(State(state): State<AppState>, user: AuthUser) -> AppResult<impl IntoResponse> {
    user.require_role(UserRole::Customer)?;
    sqlx::query("DELETE FROM cart_items WHERE user_id = ?1")
        .bind(user.id.to_string())
        .execute(&state.db)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pharmacy: &str, product: &str, price: f64, qty: i64, fee: f64) -> CartRow {
        CartRow {
            id: Uuid::new_v4().to_string(),
            product_id: Uuid::new_v4().to_string(),
            product_name: product.to_string(),
            unit_price: price,
            quantity: qty,
            available_stock: 50,
            pharmacy_id: Uuid::new_v5(&Uuid::NAMESPACE_OID, pharmacy.as_bytes()).to_string(),
            pharmacy_name: pharmacy.to_string(),
            delivery_fee: fee,
        }
    }

    #[test]
    fn test_build_cart_groups_by_pharmacy() {
        let rows = vec![
            row("Alpha", "Panadol", 3.0, 2, 500.0),
            row("Alpha", "Vitamin C", 10.0, 1, 500.0),
            row("Beta", "Gauze", 2.5, 4, 300.0),
        ];
        let cart = build_cart(&rows).unwrap();
        assert_eq!(cart.groups.len(), 2);
        assert_eq!(cart.item_count, 7);
        assert_eq!(cart.groups[0].subtotal, 16.0);
        assert_eq!(cart.groups[1].subtotal, 10.0);
        // Per-group delivery fees are part of the grand total
        assert_eq!(cart.total, 16.0 + 500.0 + 10.0 + 300.0);
    }

    #[test]
    fn test_build_cart_empty() {
        let cart = build_cart(&[]).unwrap();
        assert!(cart.groups.is_empty());
        assert_eq!(cart.item_count, 0);
        assert_eq!(cart.total, 0.0);
    }
}
