use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult, OptionExt},
    state::AppState,
    types::*,
};

use super::pharmacies::{product_dto, ProductRow, PRODUCT_COLS};

#[derive(Debug, Deserialize)]
pub struct CatalogQuery {
    pub category: Option<Uuid>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// Public catalog: active products from verified pharmacies only.
pub async fn list_products(
    State(state): State<AppState>,
    Query(q): Query<CatalogQuery>,
) -> AppResult<impl IntoResponse> {
    let paging = Pagination { page: q.page, per_page: q.per_page };
    let (page, per_page) = paging.clamp();

    let base_where = "p.status = 'active' AND ph.verification_status = 'verified'";
    let (total, rows) = if let Some(category) = q.category {
        let (total,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM products p JOIN pharmacies ph ON ph.id = p.pharmacy_id WHERE {} AND p.category_id = ?1",
            base_where
        ))
        .bind(category.to_string())
        .fetch_one(&state.db)
        .await?;
        let rows = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {} FROM products p JOIN pharmacies ph ON ph.id = p.pharmacy_id WHERE {} AND p.category_id = ?1 ORDER BY p.name LIMIT ?2 OFFSET ?3",
            prefixed_cols(),
            base_where
        ))
        .bind(category.to_string())
        .bind(per_page)
        .bind(paging.offset())
        .fetch_all(&state.db)
        .await?;
        (total, rows)
    } else {
        let (total,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM products p JOIN pharmacies ph ON ph.id = p.pharmacy_id WHERE {}",
            base_where
        ))
        .fetch_one(&state.db)
        .await?;
        let rows = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {} FROM products p JOIN pharmacies ph ON ph.id = p.pharmacy_id WHERE {} ORDER BY p.name LIMIT ?1 OFFSET ?2",
            prefixed_cols(),
            base_where
        ))
        .bind(per_page)
        .bind(paging.offset())
        .fetch_all(&state.db)
        .await?;
        (total, rows)
    };

    let items: Vec<ProductDto> = rows.iter().map(product_dto).collect::<AppResult<_>>()?;
    Ok(Json(json!({ "items": items, "page_info": PageInfo::new(page, per_page, total) })))
}

fn prefixed_cols() -> String {
    PRODUCT_COLS.split(", ").map(|c| format!("p.{}", c)).collect::<Vec<_>>().join(", ")
}

/// Public product detail with a pharmacy summary.
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let row = sqlx::query_as::<_, ProductRow>(&format!(
        "SELECT {} FROM products p JOIN pharmacies ph ON ph.id = p.pharmacy_id \
         WHERE p.id = ?1 AND p.status != 'inactive' AND ph.verification_status = 'verified'",
        prefixed_cols()
    ))
    .bind(id.to_string())
    .fetch_optional(&state.db)
    .await?
    .ok_or_not_found("Product")?;

    let (pharmacy_name, district, delivery_fee, rating): (String, String, f64, f64) = sqlx::query_as(
        "SELECT name, district, delivery_fee, rating FROM pharmacies WHERE id = ?1",
    )
    .bind(&row.pharmacy_id)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(json!({
        "product": product_dto(&row)?,
        "pharmacy": {
            "id": row.pharmacy_id,
            "name": pharmacy_name,
            "district": district,
            "delivery_fee": delivery_fee,
            "rating": rating,
        }
    })))
}

pub async fn list_categories(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let rows: Vec<(String, String, Option<String>)> =
        sqlx::query_as("SELECT id, name, name_ar FROM categories ORDER BY name")
            .fetch_all(&state.db)
            .await?;

    let items: Vec<CategoryDto> = rows
        .into_iter()
        .map(|(id, name, name_ar)| {
            let id = Uuid::parse_str(&id)
                .map_err(|e| AppError::Internal(anyhow::anyhow!("corrupt category id: {}", e)))?;
            Ok(CategoryDto { id, name, name_ar })
        })
        .collect::<AppResult<_>>()?;
    Ok(Json(items))
}
