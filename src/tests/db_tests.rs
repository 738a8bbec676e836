#[cfg(test)]
mod tests {
    use crate::db;
    use sqlx::sqlite::SqlitePoolOptions;
    use uuid::Uuid;

    async fn setup_test_db() -> sqlx::SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        db::init_db(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_init_creates_tables() {
        let pool = setup_test_db().await;
        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .fetch_all(&pool)
                .await
                .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        for expected in [
            "users",
            "user_addresses",
            "pharmacies",
            "categories",
            "products",
            "cart_items",
            "orders",
            "order_items",
            "audit_log",
            "settings",
            "districts",
        ] {
            assert!(names.contains(&expected), "missing table {}", expected);
        }
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let pool = setup_test_db().await;
        db::init_db(&pool).await.unwrap();

        // Seeds are not duplicated either
        let (categories,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM categories").fetch_one(&pool).await.unwrap();
        let (districts,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM districts").fetch_one(&pool).await.unwrap();
        assert_eq!(categories, 10);
        assert_eq!(districts, 8);
    }

    #[tokio::test]
    async fn test_foreign_keys_enforced() {
        let pool = setup_test_db().await;
        let result = sqlx::query(
            "INSERT INTO user_addresses (id, user_id, label, street, district, city) VALUES (?1, ?2, 'Home', 'a', 'b', 'c')",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(Uuid::new_v4().to_string())
        .execute(&pool)
        .await;
        assert!(result.is_err(), "orphan address insert should fail");
    }

    #[tokio::test]
    async fn test_unique_email_constraint() {
        let pool = setup_test_db().await;
        let insert = |id: Uuid, phone: &'static str| {
            let pool = pool.clone();
            async move {
                sqlx::query(
                    "INSERT INTO users (id, email, phone, password_hash, full_name) VALUES (?1, 'same@example.com', ?2, 'x', 'X')",
                )
                .bind(id.to_string())
                .bind(phone)
                .execute(&pool)
                .await
            }
        };
        assert!(insert(Uuid::new_v4(), "711111111").await.is_ok());
        assert!(insert(Uuid::new_v4(), "722222222").await.is_err());
    }

    #[tokio::test]
    async fn test_cart_unique_per_user_and_product() {
        let pool = setup_test_db().await;
        let user_id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO users (id, email, phone, password_hash, full_name) VALUES (?1, 'u@example.com', '711111111', 'x', 'U')")
            .bind(&user_id)
            .execute(&pool)
            .await
            .unwrap();
        let owner_id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO users (id, email, phone, password_hash, full_name, role) VALUES (?1, 's@example.com', '722222222', 'x', 'S', 'seller')")
            .bind(&owner_id)
            .execute(&pool)
            .await
            .unwrap();
        let pharmacy_id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO pharmacies (id, owner_id, name, license_number, address, district, latitude, longitude) VALUES (?1, ?2, 'P', 'L1', 'a', 'd', 15.0, 44.0)",
        )
        .bind(&pharmacy_id)
        .bind(&owner_id)
        .execute(&pool)
        .await
        .unwrap();
        let (category_id,): (String,) =
            sqlx::query_as("SELECT id FROM categories LIMIT 1").fetch_one(&pool).await.unwrap();
        let product_id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO products (id, pharmacy_id, category_id, name, price) VALUES (?1, ?2, ?3, 'Med', 1.0)",
        )
        .bind(&product_id)
        .bind(&pharmacy_id)
        .bind(&category_id)
        .execute(&pool)
        .await
        .unwrap();

        let add = |id: Uuid| {
            let pool = pool.clone();
            let user_id = user_id.clone();
            let product_id = product_id.clone();
            async move {
                sqlx::query(
                    "INSERT INTO cart_items (id, user_id, product_id, quantity) VALUES (?1, ?2, ?3, 1)",
                )
                .bind(id.to_string())
                .bind(user_id)
                .bind(product_id)
                .execute(&pool)
                .await
            }
        };
        assert!(add(Uuid::new_v4()).await.is_ok());
        assert!(add(Uuid::new_v4()).await.is_err(), "duplicate cart line should fail");
    }

    #[tokio::test]
    async fn test_order_items_survive_product_deletion() {
        let pool = setup_test_db().await;
        // Minimal graph: seller -> pharmacy -> product, customer -> order -> item
        let seller = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO users (id, email, phone, password_hash, full_name, role) VALUES (?1, 's@example.com', '711111111', 'x', 'S', 'seller')")
            .bind(&seller).execute(&pool).await.unwrap();
        let customer = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO users (id, email, phone, password_hash, full_name) VALUES (?1, 'c@example.com', '722222222', 'x', 'C')")
            .bind(&customer).execute(&pool).await.unwrap();
        let pharmacy = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO pharmacies (id, owner_id, name, license_number, address, district, latitude, longitude) VALUES (?1, ?2, 'P', 'L1', 'a', 'd', 15.0, 44.0)")
            .bind(&pharmacy).bind(&seller).execute(&pool).await.unwrap();
        let (category,): (String,) =
            sqlx::query_as("SELECT id FROM categories LIMIT 1").fetch_one(&pool).await.unwrap();
        let product = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO products (id, pharmacy_id, category_id, name, price) VALUES (?1, ?2, ?3, 'Med', 2.0)")
            .bind(&product).bind(&pharmacy).bind(&category).execute(&pool).await.unwrap();
        let order = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO orders (id, order_number, customer_id, pharmacy_id, subtotal, delivery_fee, total, delivery_address) VALUES (?1, 'ORD-1', ?2, ?3, 2.0, 0.0, 2.0, 'addr')")
            .bind(&order).bind(&customer).bind(&pharmacy).execute(&pool).await.unwrap();
        sqlx::query("INSERT INTO order_items (id, order_id, product_id, product_name, unit_price, quantity) VALUES (?1, ?2, ?3, 'Med', 2.0, 1)")
            .bind(Uuid::new_v4().to_string()).bind(&order).bind(&product).execute(&pool).await.unwrap();

        sqlx::query("DELETE FROM products WHERE id = ?1").bind(&product).execute(&pool).await.unwrap();

        // The snapshot row remains with a NULL product reference
        let (product_id, name): (Option<String>, String) = sqlx::query_as(
            "SELECT product_id, product_name FROM order_items WHERE order_id = ?1",
        )
        .bind(&order)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(product_id.is_none());
        assert_eq!(name, "Med");
    }
}
