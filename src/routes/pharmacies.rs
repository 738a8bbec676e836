use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    audit::{self, AuditEntry},
    error::{AppError, AppResult, OptionExt},
    middleware::validation::{sanitize_string, validate_coordinates, validate_price, validate_quantity},
    middleware::{AuthUser, MaybeAuthUser},
    state::AppState,
    types::*,
};

#[derive(sqlx::FromRow)]
pub(crate) struct PharmacyRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub license_number: String,
    pub address: String,
    pub district: String,
    pub latitude: f64,
    pub longitude: f64,
    pub opening_hours: Option<String>,
    pub delivery_fee: f64,
    pub rating: f64,
    pub verification_status: String,
    pub verification_notes: Option<String>,
}

pub(crate) const PHARMACY_COLS: &str = "id, name, description, license_number, address, district, latitude, longitude, opening_hours, delivery_fee, rating, verification_status, verification_notes";

pub(crate) fn pharmacy_dto(row: &PharmacyRow) -> AppResult<PharmacyDto> {
    let id = Uuid::parse_str(&row.id)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("corrupt pharmacy id: {}", e)))?;
    Ok(PharmacyDto {
        id,
        name: row.name.clone(),
        description: row.description.clone(),
        license_number: row.license_number.clone(),
        address: row.address.clone(),
        district: row.district.clone(),
        latitude: row.latitude,
        longitude: row.longitude,
        opening_hours: row.opening_hours.clone(),
        delivery_fee: row.delivery_fee,
        rating: row.rating,
        verification_status: row.verification_status.clone(),
        verification_notes: row.verification_notes.clone(),
        distance_km: None,
    })
}

/// Resolves the seller's own pharmacy. Sellers have exactly one; the id is
/// never taken from client input.
pub(crate) async fn own_pharmacy(db: &sqlx::SqlitePool, user: &AuthUser) -> AppResult<PharmacyRow> {
    user.require_role(UserRole::Seller)?;
    let row = sqlx::query_as::<_, PharmacyRow>(&format!(
        "SELECT {} FROM pharmacies WHERE owner_id = ?1",
        PHARMACY_COLS
    ))
    .bind(user.id.to_string())
    .fetch_optional(db)
    .await?;
    row.ok_or_not_found("Pharmacy")
}

#[derive(Debug, Deserialize)]
pub struct ListPharmaciesQuery {
    pub district: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

pub async fn list_pharmacies(
    State(state): State<AppState>,
    Query(q): Query<ListPharmaciesQuery>,
) -> AppResult<impl IntoResponse> {
    let paging = Pagination { page: q.page, per_page: q.per_page };
    let (page, per_page) = paging.clamp();

    let (total, rows) = if let Some(district) = &q.district {
        let (total,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM pharmacies WHERE verification_status = 'verified' AND district = ?1",
        )
        .bind(district)
        .fetch_one(&state.db)
        .await?;
        let rows = sqlx::query_as::<_, PharmacyRow>(&format!(
            "SELECT {} FROM pharmacies WHERE verification_status = 'verified' AND district = ?1 ORDER BY rating DESC, name LIMIT ?2 OFFSET ?3",
            PHARMACY_COLS
        ))
        .bind(district)
        .bind(per_page)
        .bind(paging.offset())
        .fetch_all(&state.db)
        .await?;
        (total, rows)
    } else {
        let (total,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM pharmacies WHERE verification_status = 'verified'")
                .fetch_one(&state.db)
                .await?;
        let rows = sqlx::query_as::<_, PharmacyRow>(&format!(
            "SELECT {} FROM pharmacies WHERE verification_status = 'verified' ORDER BY rating DESC, name LIMIT ?1 OFFSET ?2",
            PHARMACY_COLS
        ))
        .bind(per_page)
        .bind(paging.offset())
        .fetch_all(&state.db)
        .await?;
        (total, rows)
    };

    let items: Vec<PharmacyDto> = rows.iter().map(pharmacy_dto).collect::<AppResult<_>>()?;
    Ok(Json(json!({ "items": items, "page_info": PageInfo::new(page, per_page, total) })))
}

pub async fn get_pharmacy(
    State(state): State<AppState>,
    caller: MaybeAuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let row = sqlx::query_as::<_, PharmacyRow>(&format!(
        "SELECT {} FROM pharmacies WHERE id = ?1",
        PHARMACY_COLS
    ))
    .bind(id.to_string())
    .fetch_optional(&state.db)
    .await?
    .ok_or_not_found("Pharmacy")?;

    // Unverified pharmacies stay hidden from the public, but the owner and
    // admins may inspect them.
    if row.verification_status != VerificationStatus::Verified.as_str() {
        let (owner_id,): (String,) =
            sqlx::query_as("SELECT owner_id FROM pharmacies WHERE id = ?1")
                .bind(id.to_string())
                .fetch_one(&state.db)
                .await?;
        let allowed = matches!(&caller.0, Some(u) if u.is_admin() || u.id.to_string() == owner_id);
        if !allowed {
            return Err(AppError::NotFound("Pharmacy not found".to_string()));
        }
    }

    Ok(Json(pharmacy_dto(&row)?))
}

pub async fn get_my_pharmacy(State(state): State<AppState>, user: AuthUser) -> AppResult<impl IntoResponse> {
    let row = own_pharmacy(&state.db, &user).await?;
    Ok(Json(pharmacy_dto(&row)?))
}

pub async fn update_my_pharmacy(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<UpdatePharmacyRequest>,
) -> AppResult<impl IntoResponse> {
    let row = own_pharmacy(&state.db, &user).await?;

    let name = match &req.name {
        Some(n) => {
            let n = sanitize_string(n, 120);
            if n.is_empty() {
                return Err(AppError::ValidationError {
                    field: "name".to_string(),
                    message: "Pharmacy name must not be empty".to_string(),
                });
            }
            n
        }
        None => row.name.clone(),
    };
    let latitude = req.latitude.unwrap_or(row.latitude);
    let longitude = req.longitude.unwrap_or(row.longitude);
    if req.latitude.is_some() || req.longitude.is_some() {
        validate_coordinates(latitude, longitude)?;
    }
    if let Some(fee) = req.delivery_fee {
        if !fee.is_finite() || fee < 0.0 || fee > 100_000.0 {
            return Err(AppError::ValidationError {
                field: "delivery_fee".to_string(),
                message: "Delivery fee must be between 0 and 100,000".to_string(),
            });
        }
    }

    let description = req.description.as_deref().map(|d| sanitize_string(d, 1000));
    let address = match &req.address {
        Some(a) => sanitize_string(a, 250),
        None => row.address.clone(),
    };
    let district = match &req.district {
        Some(d) => sanitize_string(d, 120),
        None => row.district.clone(),
    };
    let opening_hours = req.opening_hours.as_deref().map(|h| sanitize_string(h, 250));

    sqlx::query(
        r#"UPDATE pharmacies
           SET name = ?1,
               description = COALESCE(?2, description),
               address = ?3,
               district = ?4,
               latitude = ?5,
               longitude = ?6,
               opening_hours = COALESCE(?7, opening_hours),
               delivery_fee = COALESCE(?8, delivery_fee)
           WHERE id = ?9"#,
    )
    .bind(&name)
    .bind(&description)
    .bind(&address)
    .bind(&district)
    .bind(latitude)
    .bind(longitude)
    .bind(&opening_hours)
    .bind(req.delivery_fee)
    .bind(&row.id)
    .execute(&state.db)
    .await?;

    audit::record(
        &state.db,
        AuditEntry::new("pharmacy.update").user(user.id).target("pharmacy", &row.id),
    );

    let updated = own_pharmacy(&state.db, &user).await?;
    Ok(Json(pharmacy_dto(&updated)?))
}

// ---- seller inventory ----

#[derive(sqlx::FromRow)]
pub(crate) struct ProductRow {
    pub id: String,
    pub pharmacy_id: String,
    pub category_id: String,
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub quantity_in_stock: i64,
    pub requires_prescription: i64,
    pub status: String,
    pub created_at: String,
}

pub(crate) const PRODUCT_COLS: &str = "id, pharmacy_id, category_id, name, description, price, quantity_in_stock, requires_prescription, status, created_at";

pub(crate) fn product_dto(row: &ProductRow) -> AppResult<ProductDto> {
    let id = Uuid::parse_str(&row.id)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("corrupt product id: {}", e)))?;
    let pharmacy_id = Uuid::parse_str(&row.pharmacy_id)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("corrupt pharmacy id: {}", e)))?;
    let category_id = Uuid::parse_str(&row.category_id)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("corrupt category id: {}", e)))?;
    Ok(ProductDto {
        id,
        pharmacy_id,
        category_id,
        name: row.name.clone(),
        description: row.description.clone(),
        price: row.price,
        quantity_in_stock: row.quantity_in_stock,
        requires_prescription: row.requires_prescription != 0,
        status: row.status.clone(),
        created_at: row.created_at.clone(),
    })
}

async fn category_exists(db: &sqlx::SqlitePool, id: Uuid) -> AppResult<bool> {
    let row: Option<(String,)> = sqlx::query_as("SELECT id FROM categories WHERE id = ?1")
        .bind(id.to_string())
        .fetch_optional(db)
        .await?;
    Ok(row.is_some())
}

pub async fn list_my_products(
    State(state): State<AppState>,
    user: AuthUser,
    Query(page): Query<Pagination>,
) -> AppResult<impl IntoResponse> {
    let pharmacy = own_pharmacy(&state.db, &user).await?;
    let (p, per_page) = page.clamp();

    let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM products WHERE pharmacy_id = ?1")
        .bind(&pharmacy.id)
        .fetch_one(&state.db)
        .await?;
    let rows = sqlx::query_as::<_, ProductRow>(&format!(
        "SELECT {} FROM products WHERE pharmacy_id = ?1 ORDER BY name LIMIT ?2 OFFSET ?3",
        PRODUCT_COLS
    ))
    .bind(&pharmacy.id)
    .bind(per_page)
    .bind(page.offset())
    .fetch_all(&state.db)
    .await?;

    let items: Vec<ProductDto> = rows.iter().map(product_dto).collect::<AppResult<_>>()?;
    Ok(Json(json!({ "items": items, "page_info": PageInfo::new(p, per_page, total) })))
}

pub async fn create_product(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateProductRequest>,
) -> AppResult<impl IntoResponse> {
    let pharmacy = own_pharmacy(&state.db, &user).await?;

    let name = sanitize_string(&req.name, 200);
    if name.is_empty() {
        return Err(AppError::ValidationError {
            field: "name".to_string(),
            message: "Product name is required".to_string(),
        });
    }
    validate_price(req.price)?;
    validate_quantity(req.quantity_in_stock)?;
    if !category_exists(&state.db, req.category_id).await? {
        return Err(AppError::BadRequest("Unknown category".to_string()));
    }

    let id = Uuid::new_v4();
    let description = req.description.as_deref().map(|d| sanitize_string(d, 2000));
    let status =
        if req.quantity_in_stock == 0 { ProductStatus::OutOfStock } else { ProductStatus::Active };

    sqlx::query(
        r#"INSERT INTO products (id, pharmacy_id, category_id, name, description, price, quantity_in_stock, requires_prescription, status)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
    )
    .bind(id.to_string())
    .bind(&pharmacy.id)
    .bind(req.category_id.to_string())
    .bind(&name)
    .bind(&description)
    .bind(req.price)
    .bind(req.quantity_in_stock)
    .bind(req.requires_prescription.unwrap_or(false) as i64)
    .bind(status.as_str())
    .execute(&state.db)
    .await?;

    audit::record(
        &state.db,
        AuditEntry::new("product.create")
            .user(user.id)
            .target("product", id)
            .describe(format!("added '{}' to pharmacy {}", name, pharmacy.id)),
    );

    let row = sqlx::query_as::<_, ProductRow>(&format!(
        "SELECT {} FROM products WHERE id = ?1",
        PRODUCT_COLS
    ))
    .bind(id.to_string())
    .fetch_one(&state.db)
    .await?;
    Ok((StatusCode::CREATED, Json(product_dto(&row)?)))
}

pub async fn update_product(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateProductRequest>,
) -> AppResult<impl IntoResponse> {
    let pharmacy = own_pharmacy(&state.db, &user).await?;

    let row = sqlx::query_as::<_, ProductRow>(&format!(
        "SELECT {} FROM products WHERE id = ?1 AND pharmacy_id = ?2",
        PRODUCT_COLS
    ))
    .bind(id.to_string())
    .bind(&pharmacy.id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_not_found("Product")?;

    let old = product_dto(&row)?;

    if let Some(price) = req.price {
        validate_price(price)?;
    }
    if let Some(qty) = req.quantity_in_stock {
        validate_quantity(qty)?;
    }
    if let Some(cat) = req.category_id {
        if !category_exists(&state.db, cat).await? {
            return Err(AppError::BadRequest("Unknown category".to_string()));
        }
    }
    let status = match &req.status {
        Some(s) => Some(
            ProductStatus::parse(s)
                .ok_or_else(|| AppError::BadRequest(format!("Unknown product status: {}", s)))?,
        ),
        None => None,
    };
    let name = req.name.as_deref().map(|n| sanitize_string(n, 200));
    if let Some(n) = &name {
        if n.is_empty() {
            return Err(AppError::ValidationError {
                field: "name".to_string(),
                message: "Product name must not be empty".to_string(),
            });
        }
    }
    let description = req.description.as_deref().map(|d| sanitize_string(d, 2000));

    sqlx::query(
        r#"UPDATE products
           SET category_id = COALESCE(?1, category_id),
               name = COALESCE(?2, name),
               description = COALESCE(?3, description),
               price = COALESCE(?4, price),
               quantity_in_stock = COALESCE(?5, quantity_in_stock),
               requires_prescription = COALESCE(?6, requires_prescription),
               status = COALESCE(?7, status)
           WHERE id = ?8"#,
    )
    .bind(req.category_id.map(|c| c.to_string()))
    .bind(&name)
    .bind(&description)
    .bind(req.price)
    .bind(req.quantity_in_stock)
    .bind(req.requires_prescription.map(|b| b as i64))
    .bind(status.map(|s| s.as_str()))
    .bind(id.to_string())
    .execute(&state.db)
    .await?;

    let updated = sqlx::query_as::<_, ProductRow>(&format!(
        "SELECT {} FROM products WHERE id = ?1",
        PRODUCT_COLS
    ))
    .bind(id.to_string())
    .fetch_one(&state.db)
    .await?;
    let new = product_dto(&updated)?;

    audit::record(
        &state.db,
        AuditEntry::new("product.update")
            .user(user.id)
            .target("product", id)
            .old_value(json!({ "price": old.price, "quantity": old.quantity_in_stock, "status": old.status }))
            .new_value(json!({ "price": new.price, "quantity": new.quantity_in_stock, "status": new.status })),
    );

    Ok(Json(new))
}

pub async fn delete_product(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let pharmacy = own_pharmacy(&state.db, &user).await?;

    let res = sqlx::query("DELETE FROM products WHERE id = ?1 AND pharmacy_id = ?2")
        .bind(id.to_string())
        .bind(&pharmacy.id)
        .execute(&state.db)
        .await?;
    if res.rows_affected() == 0 {
        return Err(AppError::NotFound("Product not found".to_string()));
    }

    audit::record(&state.db, AuditEntry::new("product.delete").user(user.id).target("product", id));
    Ok(Json(json!({ "message": "Product deleted" })))
}
