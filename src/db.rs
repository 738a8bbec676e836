use sqlx::SqlitePool;

pub async fn init_db(pool: &SqlitePool) -> anyhow::Result<()> {
    // Pragmas for better durability/performance
    if let Err(e) = sqlx::query("PRAGMA journal_mode=WAL;").execute(pool).await {
        tracing::warn!("Failed to set WAL journal mode: {}", e);
    }
    if let Err(e) = sqlx::query("PRAGMA synchronous=NORMAL;").execute(pool).await {
        tracing::warn!("Failed to set synchronous mode: {}", e);
    }
    // Foreign keys are critical - fail if this doesn't work
    sqlx::query("PRAGMA foreign_keys=ON;").execute(pool).await?;

    // Additional tuning (best-effort)
    if let Err(e) = sqlx::query("PRAGMA busy_timeout=10000;").execute(pool).await {
        tracing::warn!("Failed to set busy_timeout: {}", e);
    }
    if let Err(e) = sqlx::query("PRAGMA cache_size=-65536;").execute(pool).await {
        tracing::warn!("Failed to set cache_size: {}", e);
    }
    if let Err(e) = sqlx::query("PRAGMA temp_store=MEMORY;").execute(pool).await {
        tracing::warn!("Failed to set temp_store: {}", e);
    }

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            phone TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            full_name TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'customer',
            is_active INTEGER NOT NULL DEFAULT 1,
            email_verified INTEGER NOT NULL DEFAULT 0,
            verification_token TEXT NULL,
            verification_expires_at TEXT NULL,
            reset_token TEXT NULL,
            reset_expires_at TEXT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            last_login_at TEXT NULL
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS user_addresses (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            label TEXT NOT NULL,
            street TEXT NOT NULL,
            district TEXT NOT NULL,
            city TEXT NOT NULL,
            details TEXT NULL,
            is_primary INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS pharmacies (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            description TEXT NULL,
            license_number TEXT NOT NULL UNIQUE,
            address TEXT NOT NULL,
            district TEXT NOT NULL,
            latitude REAL NOT NULL,
            longitude REAL NOT NULL,
            opening_hours TEXT NULL,
            delivery_fee REAL NOT NULL DEFAULT 0,
            rating REAL NOT NULL DEFAULT 0,
            verification_status TEXT NOT NULL DEFAULT 'pending',
            verification_notes TEXT NULL,
            verified_at TEXT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            FOREIGN KEY(owner_id) REFERENCES users(id) ON DELETE CASCADE
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS categories (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            name_ar TEXT NULL
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            pharmacy_id TEXT NOT NULL,
            category_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT NULL,
            price REAL NOT NULL,
            quantity_in_stock INTEGER NOT NULL DEFAULT 0,
            requires_prescription INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            FOREIGN KEY(pharmacy_id) REFERENCES pharmacies(id) ON DELETE CASCADE,
            FOREIGN KEY(category_id) REFERENCES categories(id)
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS cart_items (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            product_id TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            UNIQUE(user_id, product_id),
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE,
            FOREIGN KEY(product_id) REFERENCES products(id) ON DELETE CASCADE
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            order_number TEXT NOT NULL UNIQUE,
            customer_id TEXT NOT NULL,
            pharmacy_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            subtotal REAL NOT NULL,
            delivery_fee REAL NOT NULL,
            total REAL NOT NULL,
            payment_method TEXT NOT NULL DEFAULT 'cash',
            delivery_address TEXT NOT NULL,
            notes TEXT NULL,
            cancel_reason TEXT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            delivered_at TEXT NULL,
            FOREIGN KEY(customer_id) REFERENCES users(id),
            FOREIGN KEY(pharmacy_id) REFERENCES pharmacies(id)
        )"#,
    )
    .execute(pool)
    .await?;

    // Items snapshot product name and unit price at order time, so product
    // rows can be deleted without losing order history.
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS order_items (
            id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL,
            product_id TEXT NULL,
            product_name TEXT NOT NULL,
            unit_price REAL NOT NULL,
            quantity INTEGER NOT NULL,
            FOREIGN KEY(order_id) REFERENCES orders(id) ON DELETE CASCADE,
            FOREIGN KEY(product_id) REFERENCES products(id) ON DELETE SET NULL
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS audit_log (
            id TEXT PRIMARY KEY,
            user_id TEXT NULL,
            action TEXT NOT NULL,
            target_type TEXT NULL,
            target_id TEXT NULL,
            description TEXT NULL,
            old_value TEXT NULL,
            new_value TEXT NULL,
            ip TEXT NULL,
            user_agent TEXT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            value_type TEXT NOT NULL DEFAULT 'string',
            description TEXT NULL,
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS districts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            name_ar TEXT NULL
        )"#,
    )
    .execute(pool)
    .await?;

    let indexes = [
        ("idx_users_email", "CREATE INDEX IF NOT EXISTS idx_users_email ON users(email)"),
        ("idx_users_role", "CREATE INDEX IF NOT EXISTS idx_users_role ON users(role)"),
        ("idx_addresses_user", "CREATE INDEX IF NOT EXISTS idx_addresses_user ON user_addresses(user_id)"),
        (
            "idx_pharmacies_status_district",
            "CREATE INDEX IF NOT EXISTS idx_pharmacies_status_district ON pharmacies(verification_status, district)",
        ),
        (
            "idx_products_pharmacy_status",
            "CREATE INDEX IF NOT EXISTS idx_products_pharmacy_status ON products(pharmacy_id, status)",
        ),
        ("idx_products_category", "CREATE INDEX IF NOT EXISTS idx_products_category ON products(category_id)"),
        ("idx_products_name", "CREATE INDEX IF NOT EXISTS idx_products_name ON products(name)"),
        ("idx_cart_user", "CREATE INDEX IF NOT EXISTS idx_cart_user ON cart_items(user_id)"),
        (
            "idx_orders_customer_created",
            "CREATE INDEX IF NOT EXISTS idx_orders_customer_created ON orders(customer_id, created_at DESC)",
        ),
        (
            "idx_orders_pharmacy_status",
            "CREATE INDEX IF NOT EXISTS idx_orders_pharmacy_status ON orders(pharmacy_id, status)",
        ),
        ("idx_order_items_order", "CREATE INDEX IF NOT EXISTS idx_order_items_order ON order_items(order_id)"),
        (
            "idx_audit_created",
            "CREATE INDEX IF NOT EXISTS idx_audit_created ON audit_log(created_at DESC)",
        ),
        ("idx_audit_action", "CREATE INDEX IF NOT EXISTS idx_audit_action ON audit_log(action)"),
    ];

    for (name, query) in indexes {
        if let Err(e) = sqlx::query(query).execute(pool).await {
            // Tolerate "already exists"
            match &e {
                sqlx::Error::Database(db_err) => {
                    let msg = db_err.message().to_lowercase();
                    if msg.contains("already exists") || msg.contains("duplicate") {
                        tracing::debug!("Index {} already exists, skipping", name);
                    } else {
                        tracing::warn!("Failed to create index {}: {}", name, e);
                    }
                }
                _ => {
                    tracing::warn!("Failed to create index {}: {}", name, e);
                }
            }
        }
    }

    seed_reference_data(pool).await?;

    Ok(())
}

/// Seeds categories and districts on first start. INSERT OR IGNORE keeps
/// restarts idempotent.
async fn seed_reference_data(pool: &SqlitePool) -> anyhow::Result<()> {
    let categories = [
        ("Pain Relief", "مسكنات الألم"),
        ("Antibiotics", "المضادات الحيوية"),
        ("Vitamins & Supplements", "الفيتامينات والمكملات"),
        ("Cold & Flu", "نزلات البرد والإنفلونزا"),
        ("Digestive Health", "صحة الجهاز الهضمي"),
        ("Skin Care", "العناية بالبشرة"),
        ("Baby Care", "العناية بالطفل"),
        ("First Aid", "الإسعافات الأولية"),
        ("Chronic Conditions", "الأمراض المزمنة"),
        ("Medical Devices", "الأجهزة الطبية"),
    ];
    for (name, name_ar) in categories {
        sqlx::query("INSERT OR IGNORE INTO categories (id, name, name_ar) VALUES (?1, ?2, ?3)")
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(name)
            .bind(name_ar)
            .execute(pool)
            .await?;
    }

    let districts = [
        ("Sanaa Old City", "صنعاء القديمة"),
        ("Al-Tahrir", "التحرير"),
        ("Al-Sabeen", "السبعين"),
        ("Shumaila", "شميلة"),
        ("Hadda", "حدة"),
        ("Al-Hasaba", "الحصبة"),
        ("Bab Al-Yemen", "باب اليمن"),
        ("Al-Zubairi", "الزبيري"),
    ];
    for (name, name_ar) in districts {
        sqlx::query("INSERT OR IGNORE INTO districts (name, name_ar) VALUES (?1, ?2)")
            .bind(name)
            .bind(name_ar)
            .execute(pool)
            .await?;
    }

    Ok(())
}
