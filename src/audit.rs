//! Fire-and-forget audit trail.
//!
//! Every sensitive mutation records who did what to which record, with
//! optional before/after JSON values. Writes are spawned off the request
//! path; a failed insert is logged and dropped, never surfaced to the
//! client.

use sqlx::SqlitePool;
use uuid::Uuid;

/// A single audit record, built up before being spawned.
#[derive(Debug, Default)]
pub struct AuditEntry {
    pub user_id: Option<Uuid>,
    pub action: String,
    pub target_type: Option<String>,
    pub target_id: Option<String>,
    pub description: Option<String>,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl AuditEntry {
    pub fn new(action: &str) -> Self {
        Self { action: action.to_string(), ..Default::default() }
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn target(mut self, target_type: &str, target_id: impl ToString) -> Self {
        self.target_type = Some(target_type.to_string());
        self.target_id = Some(target_id.to_string());
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn old_value(mut self, value: serde_json::Value) -> Self {
        self.old_value = Some(value);
        self
    }

    pub fn new_value(mut self, value: serde_json::Value) -> Self {
        self.new_value = Some(value);
        self
    }

    pub fn client(mut self, ip: Option<String>, user_agent: Option<String>) -> Self {
        self.ip = ip;
        self.user_agent = user_agent;
        self
    }
}

/// Spawns the insert and returns immediately. Audit failures must never
/// fail the request that triggered them.
pub fn record(pool: &SqlitePool, entry: AuditEntry) {
    let pool = pool.clone();
    tokio::spawn(async move {
        if let Err(e) = insert(&pool, &entry).await {
            tracing::error!("Failed to write audit entry for action {}: {}", entry.action, e);
        }
    });
}

async fn insert(pool: &SqlitePool, entry: &AuditEntry) -> sqlx::Result<()> {
    sqlx::query(
        r#"INSERT INTO audit_log
            (id, user_id, action, target_type, target_id, description, old_value, new_value, ip, user_agent)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(entry.user_id.map(|u| u.to_string()))
    .bind(&entry.action)
    .bind(&entry.target_type)
    .bind(&entry.target_id)
    .bind(&entry.description)
    .bind(entry.old_value.as_ref().map(|v| v.to_string()))
    .bind(entry.new_value.as_ref().map(|v| v.to_string()))
    .bind(&entry.ip)
    .bind(&entry.user_agent)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_builder() {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::db::init_db(&pool).await.unwrap();

        let user = Uuid::new_v4();
        let entry = AuditEntry::new("order.create")
            .user(user)
            .target("order", "ORD-20250101-ABC123")
            .describe("created order")
            .new_value(serde_json::json!({"total": 42.5}))
            .client(Some("10.0.0.1".to_string()), Some("test-agent".to_string()));

        insert(&pool, &entry).await.unwrap();

        let (action, uid): (String, String) =
            sqlx::query_as("SELECT action, user_id FROM audit_log LIMIT 1").fetch_one(&pool).await.unwrap();
        assert_eq!(action, "order.create");
        assert_eq!(uid, user.to_string());
    }
}
