//! Member repository for pharmstream
//!
//! The member username is the natural key. Updates operate on the internal
//! id; the handler resolves username to id first.

use async_trait::async_trait;
use sqlx::Row;

use crate::db::repository::{with_retry, RepositoryError, RepositoryResult, RetryConfig};
use crate::db::DbPool;
use crate::models::{MemberPatch, NewMember};

/// A persisted member row
#[derive(Debug, Clone, PartialEq)]
pub struct MemberRecord {
    pub id: i64,
    pub username: String,
    pub site_name: String,
    pub license: Option<String>,
    pub province: Option<String>,
    pub member_type: i32,
}

/// Member persistence operations used by the member event handler
#[async_trait]
pub trait MemberRepository: Send + Sync {
    /// Look up a member by its natural key
    async fn find_by_username(&self, username: &str) -> RepositoryResult<Option<MemberRecord>>;

    /// Insert a member
    async fn insert(&self, member: &NewMember) -> RepositoryResult<MemberRecord>;

    /// Apply a partial update to a member resolved to its internal id
    async fn update(&self, id: i64, patch: &MemberPatch) -> RepositoryResult<MemberRecord>;

    /// Delete a member; returns false when no row matched
    async fn delete_by_username(&self, username: &str) -> RepositoryResult<bool>;
}

/// PostgreSQL implementation of MemberRepository
pub struct PgMemberRepository {
    pool: DbPool,
    retry: RetryConfig,
}

impl PgMemberRepository {
    /// Create a new PostgreSQL member repository
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            retry: RetryConfig::default(),
        }
    }

    /// Create with custom retry configuration
    pub fn with_retry_config(pool: DbPool, retry: RetryConfig) -> Self {
        Self { pool, retry }
    }

    fn row_to_member(row: &sqlx::postgres::PgRow) -> RepositoryResult<MemberRecord> {
        Ok(MemberRecord {
            id: row.try_get("member_id")?,
            username: row.try_get("username")?,
            site_name: row.try_get("site_name")?,
            license: row.try_get("license")?,
            province: row.try_get("province")?,
            member_type: row.try_get("member_type")?,
        })
    }
}

const MEMBER_COLUMNS: &str = "member_id, username, site_name, license, province, member_type";

#[async_trait]
impl MemberRepository for PgMemberRepository {
    async fn find_by_username(&self, username: &str) -> RepositoryResult<Option<MemberRecord>> {
        with_retry(&self.retry, || async {
            let row = sqlx::query(&format!(
                "SELECT {} FROM members WHERE username = $1",
                MEMBER_COLUMNS
            ))
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

            match row {
                Some(row) => Ok(Some(Self::row_to_member(&row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn insert(&self, member: &NewMember) -> RepositoryResult<MemberRecord> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO members (username, site_name, license, province, member_type)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            MEMBER_COLUMNS
        ))
        .bind(&member.username)
        .bind(&member.site_name)
        .bind(&member.license)
        .bind(&member.province)
        .bind(member.member_type.unwrap_or(1))
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_member(&row)
    }

    async fn update(&self, id: i64, patch: &MemberPatch) -> RepositoryResult<MemberRecord> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE members SET
                site_name = COALESCE($1, site_name),
                license = COALESCE($2, license),
                province = COALESCE($3, province),
                member_type = COALESCE($4, member_type),
                updated_at = now()
            WHERE member_id = $5
            RETURNING {}
            "#,
            MEMBER_COLUMNS
        ))
        .bind(&patch.site_name)
        .bind(&patch.license)
        .bind(&patch.province)
        .bind(patch.member_type)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_member(&row),
            None => Err(RepositoryError::NotFound(format!("member id {}", id))),
        }
    }

    async fn delete_by_username(&self, username: &str) -> RepositoryResult<bool> {
        with_retry(&self.retry, || async {
            let result = sqlx::query("DELETE FROM members WHERE username = $1")
                .bind(username)
                .execute(&self.pool)
                .await?;

            Ok(result.rows_affected() > 0)
        })
        .await
    }
}
