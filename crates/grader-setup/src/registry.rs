//! Service records consumed by the hub's service discovery.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors that can occur in a registry backend.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Service record '{name}' already exists")]
    DuplicateName { name: String },

    #[error("Registry backend error: {0}")]
    Backend(String),
}

/// One grader service as the hub sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Unique service name (the course id)
    pub name: String,
    pub course_id: String,
    pub url: String,
    pub api_token: Option<String>,
    #[serde(default = "default_true")]
    pub oauth_no_confirm: bool,
    #[serde(default = "default_true")]
    pub admin: bool,
}

fn default_true() -> bool {
    true
}

impl ServiceRecord {
    /// Record with the hub defaults (`oauth_no_confirm` and `admin` set)
    pub fn new(
        name: impl Into<String>,
        course_id: impl Into<String>,
        url: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            course_id: course_id.into(),
            url: url.into(),
            api_token: Some(api_token.into()),
            oauth_no_confirm: true,
            admin: true,
        }
    }
}

/// Persistence interface for service records
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Store a record; fails with [`RegistryError::DuplicateName`] if the name is taken
    async fn insert(&self, record: ServiceRecord) -> Result<(), RegistryError>;

    /// Store a record, overwriting any record with the same name; returns
    /// whether one was overwritten
    async fn replace(&self, record: ServiceRecord) -> Result<bool, RegistryError>;

    /// Remove a record by name; returns whether one was present
    async fn remove(&self, name: &str) -> Result<bool, RegistryError>;

    /// All records, ordered by name
    async fn list(&self) -> Result<Vec<ServiceRecord>, RegistryError>;

    /// Backend identifier for logs
    fn backend(&self) -> &'static str;
}

/// Registry kept in process memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistry {
    records: Arc<RwLock<BTreeMap<String, ServiceRecord>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ServiceRegistry for InMemoryRegistry {
    async fn insert(&self, record: ServiceRecord) -> Result<(), RegistryError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.name) {
            return Err(RegistryError::DuplicateName { name: record.name });
        }
        records.insert(record.name.clone(), record);
        Ok(())
    }

    async fn replace(&self, record: ServiceRecord) -> Result<bool, RegistryError> {
        let mut records = self.records.write().await;
        Ok(records.insert(record.name.clone(), record).is_some())
    }

    async fn remove(&self, name: &str) -> Result<bool, RegistryError> {
        Ok(self.records.write().await.remove(name).is_some())
    }

    async fn list(&self) -> Result<Vec<ServiceRecord>, RegistryError> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(feature = "postgres")]
pub use postgres::PostgresRegistry;

#[cfg(feature = "postgres")]
mod postgres {
    //! PostgreSQL registry on the hub's `grader_services` table.

    use super::{RegistryError, ServiceRecord, ServiceRegistry};
    use async_trait::async_trait;
    use sqlx::postgres::PgPoolOptions;
    use sqlx::{Pool, Postgres, Row};
    use tracing::info;

    const CREATE_TABLE: &str = r"
        CREATE TABLE IF NOT EXISTS grader_services (
            id SERIAL PRIMARY KEY,
            name VARCHAR(60) NOT NULL UNIQUE,
            course_id VARCHAR(50) NOT NULL,
            url VARCHAR(100) NOT NULL,
            oauth_no_confirm BOOLEAN DEFAULT TRUE,
            admin BOOLEAN DEFAULT TRUE,
            api_token VARCHAR(150)
        )";

    fn backend_error(context: &str, e: &sqlx::Error) -> RegistryError {
        RegistryError::Backend(format!("{context}: {e}"))
    }

    #[derive(Debug, Clone)]
    pub struct PostgresRegistry {
        pool: Pool<Postgres>,
    }

    impl PostgresRegistry {
        pub fn new(pool: Pool<Postgres>) -> Self {
            Self { pool }
        }

        pub async fn connect(url: &str, max_connections: u32) -> Result<Self, RegistryError> {
            let pool = PgPoolOptions::new()
                .max_connections(max_connections)
                .connect(url)
                .await
                .map_err(|e| backend_error("Failed to connect to database", &e))?;
            Ok(Self { pool })
        }

        /// Create the `grader_services` table when missing
        pub async fn ensure_schema(&self) -> Result<(), RegistryError> {
            sqlx::query(CREATE_TABLE)
                .execute(&self.pool)
                .await
                .map_err(|e| backend_error("Failed to create grader_services", &e))?;
            info!("grader_services table ready");
            Ok(())
        }
    }

    #[async_trait]
    impl ServiceRegistry for PostgresRegistry {
        async fn insert(&self, record: ServiceRecord) -> Result<(), RegistryError> {
            let result = sqlx::query(
                "INSERT INTO grader_services (name, course_id, url, oauth_no_confirm, admin, api_token) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(&record.name)
            .bind(&record.course_id)
            .bind(&record.url)
            .bind(record.oauth_no_confirm)
            .bind(record.admin)
            .bind(&record.api_token)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => Ok(()),
                Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                    Err(RegistryError::DuplicateName { name: record.name })
                }
                Err(e) => Err(backend_error("Failed to insert service record", &e)),
            }
        }

        async fn replace(&self, record: ServiceRecord) -> Result<bool, RegistryError> {
            // xmax is non-zero only for rows touched by the UPDATE branch
            let row = sqlx::query(
                "INSERT INTO grader_services (name, course_id, url, oauth_no_confirm, admin, api_token) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 ON CONFLICT (name) DO UPDATE SET \
                 course_id = EXCLUDED.course_id, url = EXCLUDED.url, \
                 oauth_no_confirm = EXCLUDED.oauth_no_confirm, admin = EXCLUDED.admin, \
                 api_token = EXCLUDED.api_token \
                 RETURNING (xmax::text <> '0') AS replaced",
            )
            .bind(&record.name)
            .bind(&record.course_id)
            .bind(&record.url)
            .bind(record.oauth_no_confirm)
            .bind(record.admin)
            .bind(&record.api_token)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| backend_error("Failed to upsert service record", &e))?;

            row.try_get("replaced")
                .map_err(|e| backend_error("Failed to decode upsert result", &e))
        }

        async fn remove(&self, name: &str) -> Result<bool, RegistryError> {
            let rows = sqlx::query("DELETE FROM grader_services WHERE name = $1")
                .bind(name)
                .execute(&self.pool)
                .await
                .map_err(|e| backend_error("Failed to delete service record", &e))?
                .rows_affected();
            Ok(rows > 0)
        }

        async fn list(&self) -> Result<Vec<ServiceRecord>, RegistryError> {
            let rows = sqlx::query(
                "SELECT name, course_id, url, oauth_no_confirm, admin, api_token \
                 FROM grader_services ORDER BY name",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(|e| backend_error("Failed to list service records", &e))?;

            rows.iter()
                .map(|row| {
                    Ok(ServiceRecord {
                        name: row.try_get("name")?,
                        course_id: row.try_get("course_id")?,
                        url: row.try_get("url")?,
                        oauth_no_confirm: row
                            .try_get::<Option<bool>, _>("oauth_no_confirm")?
                            .unwrap_or(true),
                        admin: row.try_get::<Option<bool>, _>("admin")?.unwrap_or(true),
                        api_token: row.try_get("api_token")?,
                    })
                })
                .collect::<Result<Vec<_>, sqlx::Error>>()
                .map_err(|e| backend_error("Failed to decode service record", &e))
        }

        fn backend(&self) -> &'static str {
            "postgres"
        }
    }
}
