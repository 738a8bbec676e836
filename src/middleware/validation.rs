use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::{AppError, AppResult};

/// An Axum middleware that validates incoming requests for common security issues.
///
/// This middleware checks for:
/// - Path traversal attempts in the request URI.
/// - Suspicious user agents.
/// - Excessive content length.
pub async fn validate_request_middleware(req: Request, next: Next) -> Response {
    // Check for path traversal attempts in URL
    let uri_path = req.uri().path();
    if contains_path_traversal(uri_path) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": {
                    "code": "INVALID_PATH",
                    "message": "Path traversal detected in request",
                },
                "status": 400,
            })),
        )
            .into_response();
    }

    // Check for suspicious headers
    if let Some(user_agent) = req.headers().get("user-agent") {
        if let Ok(ua_str) = user_agent.to_str() {
            if is_suspicious_user_agent(ua_str) {
                tracing::warn!("Suspicious user agent detected: {}", ua_str);
            }
        }
    }

    // Check content length for POST/PUT requests
    // This is redundant with DefaultBodyLimit but provides early rejection
    if matches!(req.method(), &axum::http::Method::POST | &axum::http::Method::PUT) {
        if let Some(content_length) = req.headers().get("content-length") {
            if let Ok(length_str) = content_length.to_str() {
                if let Ok(length) = length_str.parse::<usize>() {
                    let max_body_size = std::env::var("MEDMARKT_MAX_BODY_SIZE")
                        .ok()
                        .and_then(|v| v.parse::<usize>().ok())
                        .unwrap_or(10 * 1024 * 1024)
                        .clamp(1024 * 1024, 50 * 1024 * 1024);
                    if length > max_body_size {
                        return (
                            StatusCode::PAYLOAD_TOO_LARGE,
                            Json(json!({
                                "error": {
                                    "code": "PAYLOAD_TOO_LARGE",
                                    "message": format!("Request body exceeds maximum size of {} bytes", max_body_size),
                                },
                                "status": 413,
                            })),
                        )
                            .into_response();
                    }
                }
            }
        }
    }

    next.run(req).await
}

/// Check if a path contains traversal patterns, including encoded variants.
fn contains_path_traversal(path: &str) -> bool {
    let lower = path.to_lowercase();

    if path.contains("/..") || path.contains("\\..") || path.starts_with("..") {
        return true;
    }
    if path.contains("/./") || path.contains("\\.\\") {
        return true;
    }
    if path.contains("....") {
        return true;
    }

    // URL-encoded variants (single and double encoding)
    let encoded_patterns = [
        "%2e%2e", "%252e%252e", "%2e/", "%252e%2f", "/%2e", "%2f%2e", "%2e\\", "%2e%5c", "%5c%2e",
        "%5c%5c", "%00",
    ];
    for pattern in &encoded_patterns {
        if lower.contains(pattern) {
            return true;
        }
    }

    path.contains('\0')
}

/// Check for suspicious user agents (simple heuristic)
fn is_suspicious_user_agent(ua: &str) -> bool {
    let ua_lower = ua.to_lowercase();
    ua_lower.contains("scanner")
        || (ua_lower.contains("crawler") && !ua_lower.contains("googlebot") && !ua_lower.contains("bingbot"))
        || ua_lower.contains("nikto")
        || ua_lower.contains("sqlmap")
        || ua_lower.contains("havij")
        || ua_lower.contains("acunetix")
}

fn err(field: &str, message: &str) -> AppError {
    AppError::ValidationError { field: field.to_string(), message: message.to_string() }
}

/// Structural email check: one `@`, non-empty local part, domain with a dot,
/// no whitespace.
pub fn validate_email(email: &str) -> AppResult<()> {
    let email = email.trim();
    if email.is_empty() || email.len() > 254 {
        return Err(err("email", "Email address is required"));
    }
    if email.chars().any(char::is_whitespace) {
        return Err(err("email", "Email address must not contain whitespace"));
    }
    let mut parts = email.splitn(2, '@');
    let local = parts.next().unwrap_or("");
    let domain = parts.next().unwrap_or("");
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(err("email", "Invalid email address format"));
    }
    if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return Err(err("email", "Invalid email domain"));
    }
    Ok(())
}

/// Yemeni phone numbers: optional `+967`, `967` or `0` prefix, then 8 or 9
/// digits, the first of which is 1-9.
pub fn validate_phone(phone: &str) -> AppResult<()> {
    let phone = phone.trim();
    let rest = phone
        .strip_prefix("+967")
        .or_else(|| phone.strip_prefix("967"))
        .or_else(|| phone.strip_prefix('0'))
        .unwrap_or(phone);

    let len_ok = rest.len() == 8 || rest.len() == 9;
    let digits_ok = rest.chars().all(|c| c.is_ascii_digit());
    let first_ok = rest.chars().next().map(|c| ('1'..='9').contains(&c)).unwrap_or(false);

    if !(len_ok && digits_ok && first_ok) {
        return Err(err("phone", "Invalid Yemeni phone number"));
    }
    Ok(())
}

const WEAK_PASSWORDS: &[&str] =
    &["password", "password1", "12345678", "123456789", "qwerty123", "abc12345", "admin123", "yemen123"];

/// Password strength: at least 8 chars with upper, lower and digit, and not
/// on the weak-password denylist.
pub fn validate_password(password: &str) -> AppResult<()> {
    if password.len() < 8 {
        return Err(err("password", "Password must be at least 8 characters long"));
    }
    if password.len() > 128 {
        return Err(err("password", "Password must be at most 128 characters long"));
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(err("password", "Password must contain an uppercase letter"));
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Err(err("password", "Password must contain a lowercase letter"));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(err("password", "Password must contain a digit"));
    }
    if WEAK_PASSWORDS.contains(&password.to_lowercase().as_str()) {
        return Err(err("password", "Password is too common"));
    }
    Ok(())
}

/// Prices are positive, capped at 1,000,000 and carry at most two decimals.
pub fn validate_price(price: f64) -> AppResult<()> {
    if !price.is_finite() || price <= 0.0 {
        return Err(err("price", "Price must be a positive number"));
    }
    if price > 1_000_000.0 {
        return Err(err("price", "Price must not exceed 1,000,000"));
    }
    let cents = price * 100.0;
    if (cents - cents.round()).abs() > 1e-6 {
        return Err(err("price", "Price must have at most two decimal places"));
    }
    Ok(())
}

pub fn validate_quantity(quantity: i64) -> AppResult<()> {
    if !(0..=10_000).contains(&quantity) {
        return Err(err("quantity", "Quantity must be between 0 and 10,000"));
    }
    Ok(())
}

/// Coordinates must be valid and inside Yemen's bounding box
/// (lat 12..=19, lng 42..=54).
pub fn validate_coordinates(latitude: f64, longitude: f64) -> AppResult<()> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(err("latitude", "Latitude must be between -90 and 90"));
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(err("longitude", "Longitude must be between -180 and 180"));
    }
    if !(12.0..=19.0).contains(&latitude) || !(42.0..=54.0).contains(&longitude) {
        return Err(err("coordinates", "Coordinates must be within Yemen"));
    }
    Ok(())
}

/// Strips control characters, trims, and caps the length.
pub fn sanitize_string(input: &str, max_len: usize) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || *c == '\n')
        .collect::<String>()
        .trim()
        .chars()
        .take(max_len)
        .collect()
}

/// Sanitizes user input for logging purposes.
pub fn sanitize_for_logging(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .take(200)
        .collect::<String>()
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\'', "\\\'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_traversal_detection() {
        assert!(contains_path_traversal("../etc/passwd"));
        assert!(contains_path_traversal("./../../etc/passwd"));
        assert!(contains_path_traversal("/path/../etc"));
        assert!(contains_path_traversal("%2e%2e/etc"));
        assert!(contains_path_traversal("path\0with\0null"));

        assert!(!contains_path_traversal("/api/products"));
        assert!(!contains_path_traversal("/api/orders/abc123"));
    }

    #[test]
    fn test_suspicious_user_agents() {
        assert!(is_suspicious_user_agent("nikto/2.1.5"));
        assert!(is_suspicious_user_agent("sqlmap/1.0"));
        assert!(is_suspicious_user_agent("random scanner bot"));

        assert!(!is_suspicious_user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64)"));
        assert!(!is_suspicious_user_agent("Googlebot/2.1"));
    }

    #[test]
    fn test_email_validation() {
        assert!(validate_email("user@example.com").is_ok());
        assert!(validate_email("a.b+c@sub.example.org").is_ok());

        assert!(validate_email("").is_err());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("user@nodot").is_err());
        assert!(validate_email("user name@example.com").is_err());
        assert!(validate_email("user@.example.com").is_err());
    }

    #[test]
    fn test_phone_validation() {
        assert!(validate_phone("+967712345678").is_ok());
        assert!(validate_phone("967712345678").is_ok());
        assert!(validate_phone("0712345678").is_ok());
        assert!(validate_phone("71234567").is_ok());

        assert!(validate_phone("+96701234567").is_err()); // leading zero after prefix
        assert!(validate_phone("12345").is_err());
        assert!(validate_phone("71234abc").is_err());
        assert!(validate_phone("").is_err());
    }

    #[test]
    fn test_password_validation() {
        assert!(validate_password("Str0ngPass").is_ok());

        assert!(validate_password("short1A").is_err());
        assert!(validate_password("alllowercase1").is_err());
        assert!(validate_password("ALLUPPERCASE1").is_err());
        assert!(validate_password("NoDigitsHere").is_err());
        assert!(validate_password("Password1").is_err() || validate_password("password1").is_err());
    }

    #[test]
    fn test_price_validation() {
        assert!(validate_price(10.50).is_ok());
        assert!(validate_price(1_000_000.0).is_ok());

        assert!(validate_price(0.0).is_err());
        assert!(validate_price(-5.0).is_err());
        assert!(validate_price(1_000_000.01).is_err());
        assert!(validate_price(9.999).is_err());
        assert!(validate_price(f64::NAN).is_err());
    }

    #[test]
    fn test_quantity_validation() {
        assert!(validate_quantity(0).is_ok());
        assert!(validate_quantity(10_000).is_ok());
        assert!(validate_quantity(-1).is_err());
        assert!(validate_quantity(10_001).is_err());
    }

    #[test]
    fn test_coordinate_validation() {
        // Sanaa
        assert!(validate_coordinates(15.3694, 44.1910).is_ok());

        assert!(validate_coordinates(91.0, 44.0).is_err());
        assert!(validate_coordinates(15.0, 181.0).is_err());
        // Valid globally but outside Yemen
        assert!(validate_coordinates(52.52, 13.40).is_err());
    }

    #[test]
    fn test_sanitize_string() {
        assert_eq!(sanitize_string("  hello  ", 100), "hello");
        assert_eq!(sanitize_string("a\x00b\x01c", 100), "abc");
        assert_eq!(sanitize_string(&"x".repeat(300), 10).len(), 10);
    }

    #[test]
    fn test_sanitize_for_logging() {
        assert_eq!(sanitize_for_logging("normal text"), "normal text");

        let with_control = "text\x00with\x01control\x02chars";
        let sanitized = sanitize_for_logging(with_control);
        assert!(!sanitized.contains('\x00'));

        let long_text = "a".repeat(300);
        assert_eq!(sanitize_for_logging(&long_text).len(), 200);
    }
}
