use std::time::Duration;

use async_trait::async_trait;
use portal_contracts::{ContactRecord, OrganizationMembership, ProfileRecord};
use sqlx::Row;
use sqlx::postgres::PgPoolOptions;

pub mod access;
pub mod memory;
pub mod resolver;

pub use access::authorize_page;
pub use memory::MemoryDirectory;
pub use resolver::{Resolution, resolve};

#[derive(Debug)]
pub enum DirectoryError {
    Timeout,
    Ambiguous { query: &'static str },
    Unavailable(String),
    Sqlx(sqlx::Error),
}

impl std::fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DirectoryError::Timeout => write!(f, "directory query timed out"),
            DirectoryError::Ambiguous { query } => {
                write!(f, "{} matched more than one row", query)
            }
            DirectoryError::Unavailable(reason) => write!(f, "directory unavailable: {}", reason),
            DirectoryError::Sqlx(err) => write!(f, "directory sql error: {}", err),
        }
    }
}

impl std::error::Error for DirectoryError {}

impl From<sqlx::Error> for DirectoryError {
    fn from(value: sqlx::Error) -> Self {
        DirectoryError::Sqlx(value)
    }
}

/// Read-only lookups backing principal resolution.
#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
    async fn contact_by_identity(
        &self,
        identity_id: &str,
    ) -> Result<Option<ContactRecord>, DirectoryError>;

    async fn profile_by_identity(
        &self,
        identity_id: &str,
    ) -> Result<Option<ProfileRecord>, DirectoryError>;

    async fn memberships_by_identity(
        &self,
        identity_id: &str,
    ) -> Result<Vec<OrganizationMembership>, DirectoryError>;

    async fn ping(&self) -> Result<(), DirectoryError>;
}

#[derive(Debug, Clone)]
pub struct PgDirectoryOptions {
    pub max_connections: u32,
    pub connect_timeout: Duration,
    pub query_timeout: Duration,
}

#[derive(Clone)]
pub struct PgDirectory {
    pool: sqlx::PgPool,
    query_timeout: Duration,
}

impl PgDirectory {
    pub async fn connect(
        db_url: &str,
        options: &PgDirectoryOptions,
    ) -> Result<Self, DirectoryError> {
        let pool = tokio::time::timeout(
            options.connect_timeout,
            PgPoolOptions::new()
                .max_connections(options.max_connections)
                .connect(db_url),
        )
        .await
        .map_err(|_| DirectoryError::Timeout)??;

        Ok(Self::from_pool(pool, options.query_timeout))
    }

    pub fn from_pool(pool: sqlx::PgPool, query_timeout: Duration) -> Self {
        Self {
            pool,
            query_timeout,
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl PrincipalDirectory for PgDirectory {
    async fn contact_by_identity(
        &self,
        identity_id: &str,
    ) -> Result<Option<ContactRecord>, DirectoryError> {
        let rows = tokio::time::timeout(
            self.query_timeout,
            sqlx::query("SELECT id, contact_types_id FROM contacts WHERE user_id = $1 LIMIT 2")
                .bind(identity_id)
                .fetch_all(&self.pool),
        )
        .await
        .map_err(|_| DirectoryError::Timeout)??;

        let Some(row) = single_row(rows, "contact_by_identity")? else {
            return Ok(None);
        };

        Ok(Some(ContactRecord {
            id: row.try_get("id")?,
            contact_types_id: row.try_get("contact_types_id")?,
        }))
    }

    async fn profile_by_identity(
        &self,
        identity_id: &str,
    ) -> Result<Option<ProfileRecord>, DirectoryError> {
        let rows = tokio::time::timeout(
            self.query_timeout,
            sqlx::query("SELECT role FROM profiles WHERE id = $1 LIMIT 2")
                .bind(identity_id)
                .fetch_all(&self.pool),
        )
        .await
        .map_err(|_| DirectoryError::Timeout)??;

        let Some(row) = single_row(rows, "profile_by_identity")? else {
            return Ok(None);
        };

        Ok(Some(ProfileRecord {
            role: row.try_get("role")?,
        }))
    }

    async fn memberships_by_identity(
        &self,
        identity_id: &str,
    ) -> Result<Vec<OrganizationMembership>, DirectoryError> {
        let rows = tokio::time::timeout(
            self.query_timeout,
            sqlx::query(
                "SELECT user_id, org_id FROM organization_members WHERE user_id = $1 ORDER BY org_id",
            )
            .bind(identity_id)
            .fetch_all(&self.pool),
        )
        .await
        .map_err(|_| DirectoryError::Timeout)??;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(OrganizationMembership {
                identity_id: row.try_get("user_id")?,
                org_id: row.try_get("org_id")?,
            });
        }
        Ok(out)
    }

    async fn ping(&self) -> Result<(), DirectoryError> {
        tokio::time::timeout(
            self.query_timeout,
            sqlx::query("SELECT 1").execute(&self.pool),
        )
        .await
        .map_err(|_| DirectoryError::Timeout)??;
        Ok(())
    }
}

/// Zero rows is absent; more than one is an error, never a silent pick.
fn single_row<T>(mut rows: Vec<T>, query: &'static str) -> Result<Option<T>, DirectoryError> {
    match rows.len() {
        0 => Ok(None),
        1 => Ok(rows.pop()),
        _ => Err(DirectoryError::Ambiguous { query }),
    }
}
