use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use sqlx::{QueryBuilder, Row};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    middleware::ip::extract_ip_from_headers,
    state::AppState,
    types::*,
};

use super::pharmacies::{pharmacy_dto, product_dto, PharmacyRow, ProductRow};

const LIKE_ESCAPE: char = '!';

fn escape_like_pattern(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | LIKE_ESCAPE) {
            out.push(LIKE_ESCAPE);
        }
        out.push(ch);
    }
    out
}

fn sanitize_search_term(raw: &str) -> Result<String, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidInput("Search query cannot be empty".to_string()));
    }
    if trimmed.chars().count() > 200 {
        return Err(AppError::InvalidInput("Search query too long".to_string()));
    }
    let sanitized: String = trimmed.chars().filter(|ch| !ch.is_control() || ch.is_whitespace()).collect();
    if sanitized.trim().is_empty() {
        return Err(AppError::InvalidInput("Search query contains only special characters".to_string()));
    }
    Ok(sanitized)
}

#[derive(Debug, Deserialize)]
pub struct ProductSearchQuery {
    pub q: Option<String>,
    pub category: Option<Uuid>,
    pub district: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    /// relevance | price_asc | price_desc | name
    pub sort: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

pub async fn search_products(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ProductSearchQuery>,
) -> AppResult<impl IntoResponse> {
    let ip = extract_ip_from_headers(&headers, None);
    if let Err((status, body)) = state.rate_limiter.check_endpoint_limit("/api/search", ip).await {
        return Ok((status, body).into_response());
    }

    if let (Some(min), Some(max)) = (query.min_price, query.max_price) {
        if min > max {
            return Err(AppError::InvalidInput("min_price must not exceed max_price".to_string()));
        }
    }

    let term = match &query.q {
        Some(q) => Some(sanitize_search_term(q)?),
        None => None,
    };
    let paging = Pagination { page: query.page, per_page: query.per_page };
    let (page, per_page) = paging.clamp();

    // Shared WHERE clause builder for the COUNT and SELECT queries
    let push_filters = |qb: &mut QueryBuilder<sqlx::Sqlite>| {
        qb.push(" FROM products p JOIN pharmacies ph ON ph.id = p.pharmacy_id ");
        qb.push("WHERE p.status = 'active' AND ph.verification_status = 'verified'");
        if let Some(term) = &term {
            let pattern = format!("%{}%", escape_like_pattern(term));
            qb.push(" AND (p.name LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '!' COLLATE NOCASE OR p.description LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '!' COLLATE NOCASE)");
        }
        if let Some(category) = query.category {
            qb.push(" AND p.category_id = ").push_bind(category.to_string());
        }
        if let Some(district) = &query.district {
            qb.push(" AND ph.district = ").push_bind(district.clone());
        }
        if let Some(min) = query.min_price {
            qb.push(" AND p.price >= ").push_bind(min);
        }
        if let Some(max) = query.max_price {
            qb.push(" AND p.price <= ").push_bind(max);
        }
    };

    let mut count_qb = QueryBuilder::new("SELECT COUNT(*) AS cnt");
    push_filters(&mut count_qb);
    let total: i64 = count_qb.build().fetch_one(&state.db).await?.try_get("cnt")?;

    let mut qb = QueryBuilder::new(
        "SELECT p.id, p.pharmacy_id, p.category_id, p.name, p.description, p.price, p.quantity_in_stock, p.requires_prescription, p.status, p.created_at",
    );
    push_filters(&mut qb);

    match query.sort.as_deref().unwrap_or("relevance") {
        "relevance" => {
            if let Some(term) = &term {
                // Name-prefix matches rank above substring matches
                let prefix = format!("{}%", escape_like_pattern(term));
                qb.push(" ORDER BY CASE WHEN p.name LIKE ")
                    .push_bind(prefix)
                    .push(" ESCAPE '!' COLLATE NOCASE THEN 0 ELSE 1 END, p.name");
            } else {
                qb.push(" ORDER BY p.name");
            }
        }
        "price_asc" => {
            qb.push(" ORDER BY p.price ASC, p.name");
        }
        "price_desc" => {
            qb.push(" ORDER BY p.price DESC, p.name");
        }
        "name" => {
            qb.push(" ORDER BY p.name");
        }
        other => {
            return Err(AppError::InvalidInput(format!("Unknown sort: {}", other)));
        }
    }
    qb.push(" LIMIT ").push_bind(per_page).push(" OFFSET ").push_bind(paging.offset());

    let rows: Vec<ProductRow> = qb.build_query_as().fetch_all(&state.db).await?;
    let items: Vec<ProductDto> = rows.iter().map(product_dto).collect::<AppResult<_>>()?;

    Ok(Json(json!({ "items": items, "page_info": PageInfo::new(page, per_page, total) })).into_response())
}

#[derive(Debug, Deserialize)]
pub struct PharmacySearchQuery {
    pub q: Option<String>,
    pub district: Option<String>,
    pub min_rating: Option<f64>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub radius_km: Option<f64>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two coordinates in kilometers.
fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlng = (lng2 - lng1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

pub async fn search_pharmacies(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PharmacySearchQuery>,
) -> AppResult<impl IntoResponse> {
    let ip = extract_ip_from_headers(&headers, None);
    if let Err((status, body)) = state.rate_limiter.check_endpoint_limit("/api/search", ip).await {
        return Ok((status, body).into_response());
    }

    let term = match &query.q {
        Some(q) => Some(sanitize_search_term(q)?),
        None => None,
    };
    let origin = match (query.lat, query.lng) {
        (Some(lat), Some(lng)) => {
            if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
                return Err(AppError::InvalidInput("Invalid coordinates".to_string()));
            }
            Some((lat, lng))
        }
        (None, None) => None,
        _ => return Err(AppError::InvalidInput("lat and lng must be given together".to_string())),
    };
    let radius_km = query.radius_km.unwrap_or(10.0);
    if !radius_km.is_finite() || radius_km <= 0.0 || radius_km > 500.0 {
        return Err(AppError::InvalidInput("radius_km must be between 0 and 500".to_string()));
    }

    let paging = Pagination { page: query.page, per_page: query.per_page };
    let (page, per_page) = paging.clamp();

    let mut qb = QueryBuilder::new(format!(
        "SELECT {} FROM pharmacies WHERE verification_status = 'verified'",
        super::pharmacies::PHARMACY_COLS
    ));
    if let Some(term) = &term {
        let pattern = format!("%{}%", escape_like_pattern(term));
        qb.push(" AND name LIKE ").push_bind(pattern).push(" ESCAPE '!' COLLATE NOCASE");
    }
    if let Some(district) = &query.district {
        qb.push(" AND district = ").push_bind(district.clone());
    }
    if let Some(min_rating) = query.min_rating {
        qb.push(" AND rating >= ").push_bind(min_rating);
    }
    if let Some((lat, lng)) = origin {
        // Cheap bounding-box prefilter; the exact haversine cut happens below
        let lat_delta = radius_km / 111.0;
        let lng_delta = radius_km / (111.0 * lat.to_radians().cos().max(0.01));
        qb.push(" AND latitude BETWEEN ")
            .push_bind(lat - lat_delta)
            .push(" AND ")
            .push_bind(lat + lat_delta)
            .push(" AND longitude BETWEEN ")
            .push_bind(lng - lng_delta)
            .push(" AND ")
            .push_bind(lng + lng_delta);
    }
    qb.push(" ORDER BY rating DESC, name");

    let rows: Vec<PharmacyRow> = qb.build_query_as().fetch_all(&state.db).await?;

    let mut items: Vec<PharmacyDto> = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut dto = pharmacy_dto(row)?;
        if let Some((lat, lng)) = origin {
            let d = haversine_km(lat, lng, row.latitude, row.longitude);
            if d > radius_km {
                continue;
            }
            dto.distance_km = Some((d * 100.0).round() / 100.0);
        }
        items.push(dto);
    }
    if origin.is_some() {
        items.sort_by(|a, b| {
            a.distance_km
                .partial_cmp(&b.distance_km)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    let total = items.len() as i64;
    let offset = paging.offset() as usize;
    let paged: Vec<PharmacyDto> = items.into_iter().skip(offset).take(per_page as usize).collect();

    Ok(Json(json!({ "items": paged, "page_info": PageInfo::new(page, per_page, total) })).into_response())
}

#[derive(Debug, Deserialize)]
pub struct SuggestionsQuery {
    pub q: Option<String>,
    pub limit: Option<i64>,
}

/// Prefix suggestions over product and pharmacy names. Queries shorter than
/// two characters return an empty list.
pub async fn suggestions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SuggestionsQuery>,
) -> AppResult<impl IntoResponse> {
    let ip = extract_ip_from_headers(&headers, None);
    if let Err((status, body)) = state.rate_limiter.check_endpoint_limit("/api/search", ip).await {
        return Ok((status, body).into_response());
    }

    let term = query.q.as_deref().unwrap_or("").trim().to_string();
    if term.chars().count() < 2 {
        return Ok(Json(json!({ "suggestions": [] })).into_response());
    }
    let term = sanitize_search_term(&term)?;
    let limit = query.limit.unwrap_or(10).clamp(1, 20);
    let prefix = format!("{}%", escape_like_pattern(&term));

    let rows: Vec<(String,)> = sqlx::query_as(
        r#"SELECT name FROM (
               SELECT p.name AS name FROM products p
                 JOIN pharmacies ph ON ph.id = p.pharmacy_id
                WHERE p.status = 'active' AND ph.verification_status = 'verified'
                  AND p.name LIKE ?1 ESCAPE '!' COLLATE NOCASE
               UNION ALL
               SELECT name FROM pharmacies
                WHERE verification_status = 'verified'
                  AND name LIKE ?1 ESCAPE '!' COLLATE NOCASE
           ) ORDER BY name LIMIT ?2"#,
    )
    .bind(&prefix)
    .bind(limit * 2)
    .fetch_all(&state.db)
    .await?;

    // Dedupe case-insensitively while keeping order
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for (name,) in rows {
        if seen.insert(name.to_lowercase()) {
            out.push(name);
            if out.len() as i64 >= limit {
                break;
            }
        }
    }

    Ok(Json(json!({ "suggestions": out })).into_response())
}
