#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    use crate::tests::helpers::*;
    use crate::types::UserRole;

    #[tokio::test]
    async fn test_admin_routes_forbidden_for_customers() {
        let (app, state, _db) = setup_test_app().await;
        let (_, token) = create_user(&state, "cust@example.com", UserRole::Customer).await;
        for uri in ["/api/admin/dashboard", "/api/admin/users", "/api/admin/settings"] {
            let response =
                app.clone().oneshot(request(Method::GET, uri, Some(&token), None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::FORBIDDEN, "expected 403 for {}", uri);
        }
    }

    #[tokio::test]
    async fn test_pharmacy_verification_flow() {
        let (app, state, _db) = setup_test_app().await;
        let (_, admin_token) = create_user(&state, "admin@example.com", UserRole::Admin).await;
        let (seller_id, _) = create_user(&state, "seller@example.com", UserRole::Seller).await;
        let pharmacy_id = create_pharmacy(&state, seller_id, "Pending Pharmacy", false).await;

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/api/admin/pharmacies/pending", Some(&admin_token), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["items"].as_array().unwrap().len(), 1);
        assert_eq!(body["items"][0]["name"], "Pending Pharmacy");

        let response = app
            .clone()
            .oneshot(request(
                Method::PUT,
                &format!("/api/admin/pharmacies/{}/verify", pharmacy_id),
                Some(&admin_token),
                Some(json!({ "approve": true, "notes": "License checked" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["verification_status"], "verified");

        // A decided pharmacy cannot be decided again
        let response = app
            .clone()
            .oneshot(request(
                Method::PUT,
                &format!("/api/admin/pharmacies/{}/verify", pharmacy_id),
                Some(&admin_token),
                Some(json!({ "approve": false })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        // Verified pharmacies appear in the public listing
        let response =
            app.oneshot(request(Method::GET, "/api/pharmacies", None, None)).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["items"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_pharmacy_stays_hidden() {
        let (app, state, _db) = setup_test_app().await;
        let (_, admin_token) = create_user(&state, "admin@example.com", UserRole::Admin).await;
        let (seller_id, _) = create_user(&state, "seller@example.com", UserRole::Seller).await;
        let pharmacy_id = create_pharmacy(&state, seller_id, "Shady Pharmacy", false).await;

        let response = app
            .clone()
            .oneshot(request(
                Method::PUT,
                &format!("/api/admin/pharmacies/{}/verify", pharmacy_id),
                Some(&admin_token),
                Some(json!({ "approve": false, "notes": "No valid license" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["verification_status"], "rejected");

        let response =
            app.oneshot(request(Method::GET, "/api/pharmacies", None, None)).await.unwrap();
        let body = body_json(response).await;
        assert!(body["items"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_user_deactivation_rules() {
        let (app, state, _db) = setup_test_app().await;
        let (admin_id, admin_token) = create_user(&state, "admin@example.com", UserRole::Admin).await;
        let (customer_id, _) = create_user(&state, "cust@example.com", UserRole::Customer).await;

        let response = app
            .clone()
            .oneshot(request(
                Method::PUT,
                &format!("/api/admin/users/{}/status", customer_id),
                Some(&admin_token),
                Some(json!({ "is_active": false })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Deactivated accounts cannot log in
        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({ "email": "cust@example.com", "password": TEST_PASSWORD })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        // Admins cannot be deactivated
        let response = app
            .oneshot(request(
                Method::PUT,
                &format!("/api/admin/users/{}/status", admin_id),
                Some(&admin_token),
                Some(json!({ "is_active": false })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_users_filters() {
        let (app, state, _db) = setup_test_app().await;
        let (_, admin_token) = create_user(&state, "admin@example.com", UserRole::Admin).await;
        create_user(&state, "c1@example.com", UserRole::Customer).await;
        create_user(&state, "c2@example.com", UserRole::Customer).await;
        create_user(&state, "s1@example.com", UserRole::Seller).await;

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/api/admin/users?role=customer", Some(&admin_token), None))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["page_info"]["total"], 2);

        let response = app
            .oneshot(request(
                Method::GET,
                "/api/admin/users?search=s1%40example",
                Some(&admin_token),
                None,
            ))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["page_info"]["total"], 1);
        assert_eq!(body["items"][0]["role"], "seller");
    }

    #[tokio::test]
    async fn test_settings_roundtrip_and_typing() {
        let (app, state, _db) = setup_test_app().await;
        let (_, admin_token) = create_user(&state, "admin@example.com", UserRole::Admin).await;

        let response = app
            .clone()
            .oneshot(request(
                Method::PUT,
                "/api/admin/settings/orders.max_per_day",
                Some(&admin_token),
                Some(json!({ "value": 25, "value_type": "integer", "description": "Daily cap" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["value"], 25);
        assert_eq!(body["value_type"], "integer");

        // Type mismatch is rejected
        let response = app
            .clone()
            .oneshot(request(
                Method::PUT,
                "/api/admin/settings/orders.max_per_day",
                Some(&admin_token),
                Some(json!({ "value": "lots", "value_type": "integer" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Updating without a type keeps the stored one
        let response = app
            .clone()
            .oneshot(request(
                Method::PUT,
                "/api/admin/settings/orders.max_per_day",
                Some(&admin_token),
                Some(json!({ "value": 50 })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["value"], 50);

        let response = app
            .oneshot(request(Method::GET, "/api/admin/settings", Some(&admin_token), None))
            .await
            .unwrap();
        let body = body_json(response).await;
        let items = body["items"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["key"], "orders.max_per_day");
        assert_eq!(items[0]["description"], "Daily cap");
    }

    #[tokio::test]
    async fn test_audit_log_records_admin_actions() {
        let (app, state, _db) = setup_test_app().await;
        let (_, admin_token) = create_user(&state, "admin@example.com", UserRole::Admin).await;
        let (customer_id, _) = create_user(&state, "cust@example.com", UserRole::Customer).await;

        let response = app
            .clone()
            .oneshot(request(
                Method::PUT,
                &format!("/api/admin/users/{}/status", customer_id),
                Some(&admin_token),
                Some(json!({ "is_active": false })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Audit writes happen off the request path
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        let response = app
            .oneshot(request(
                Method::GET,
                "/api/admin/audit-log?action=admin.user_status",
                Some(&admin_token),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let items = body["items"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["action"], "admin.user_status");
        assert_eq!(items[0]["target_id"], customer_id.to_string());
        assert_eq!(items[0]["old_value"], true);
        assert_eq!(items[0]["new_value"], false);
    }

    #[tokio::test]
    async fn test_dashboard_counts() {
        let (app, state, _db) = setup_test_app().await;
        let (_, admin_token) = create_user(&state, "admin@example.com", UserRole::Admin).await;
        let (seller_id, _) = create_user(&state, "seller@example.com", UserRole::Seller).await;
        create_user(&state, "cust@example.com", UserRole::Customer).await;
        let pharmacy_id = create_pharmacy(&state, seller_id, "Dash Pharmacy", true).await;
        create_product(&state, pharmacy_id, "Ibuprofen", 5.0, 20).await;

        // One delivered order inside the 7-day window
        let (customer_id, _) = create_user(&state, "buyer@example.com", UserRole::Customer).await;
        sqlx::query(
            r#"INSERT INTO orders (id, order_number, customer_id, pharmacy_id, status, subtotal, delivery_fee, total, delivery_address)
               VALUES (?1, 'ORD-20260801-DASH01', ?2, ?3, 'delivered', 10.0, 500.0, 510.0, 'addr')"#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(customer_id.to_string())
        .bind(pharmacy_id.to_string())
        .execute(&state.db)
        .await
        .unwrap();

        let response = app
            .oneshot(request(Method::GET, "/api/admin/dashboard", Some(&admin_token), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["users"]["total"], 4);
        assert_eq!(body["users"]["customers"], 2);
        assert_eq!(body["users"]["sellers"], 1);
        assert_eq!(body["pharmacies"]["total"], 1);
        assert_eq!(body["products"]["total"], 1);
        assert_eq!(body["orders"]["total"], 1);
        assert_eq!(body["orders"]["pending"], 0);
        assert_eq!(body["orders"]["last_7_days"], 1);
        assert_eq!(body["orders"]["last_30_days"], 1);
        assert_eq!(body["revenue"]["last_7_days"], 510.0);
        assert_eq!(body["revenue"]["last_30_days"], 510.0);
    }

    #[tokio::test]
    async fn test_pending_pharmacy_detail_visible_to_owner_and_admin() {
        let (app, state, _db) = setup_test_app().await;
        let (_, admin_token) = create_user(&state, "admin@example.com", UserRole::Admin).await;
        let (seller_id, seller_token) =
            create_user(&state, "seller@example.com", UserRole::Seller).await;
        let (_, other_token) = create_user(&state, "cust@example.com", UserRole::Customer).await;
        let pharmacy_id = create_pharmacy(&state, seller_id, "Awaiting Pharmacy", false).await;
        let uri = format!("/api/pharmacies/{}", pharmacy_id);

        // Hidden from the public and from unrelated users
        let response = app.clone().oneshot(request(Method::GET, &uri, None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response =
            app.clone().oneshot(request(Method::GET, &uri, Some(&other_token), None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        // The owner and admins can inspect it
        let response = app
            .clone()
            .oneshot(request(Method::GET, &uri, Some(&seller_token), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["verification_status"], "pending");
        let response =
            app.oneshot(request(Method::GET, &uri, Some(&admin_token), None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["name"], "Awaiting Pharmacy");
    }
}
