use async_trait::async_trait;
use time::OffsetDateTime;

use crate::{
    application::repos::{RepoError, UsersRepo, UsersWriteRepo},
    domain::entities::UserRecord,
    domain::users::{NewUser, UserPatch},
};

use super::{PostgresUsers, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    name: String,
    email: String,
    version: i64,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<UserRow> for UserRecord {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            email: row.email,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl UsersRepo for PostgresUsers {
    async fn load(&self, id: i64) -> Result<UserRecord, RepoError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, name, email, version, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(UserRecord::from).ok_or(RepoError::NotFound)
    }

    async fn list(&self, limit: u32, offset: u64) -> Result<Vec<UserRecord>, RepoError> {
        let offset = i64::try_from(offset).map_err(|_| RepoError::InvalidInput {
            message: "offset exceeds supported range".to_string(),
        })?;

        let rows = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, name, email, version, created_at, updated_at
            FROM users
            ORDER BY id
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(i64::from(limit))
        .bind(offset)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(UserRecord::from).collect())
    }

    async fn count(&self) -> Result<u64, RepoError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Self::convert_count(total)
    }

    async fn health_check(&self) -> Result<(), RepoError> {
        self.ping().await.map_err(map_sqlx_error)
    }
}

#[async_trait]
impl UsersWriteRepo for PostgresUsers {
    async fn create(&self, user: NewUser) -> Result<UserRecord, RepoError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (name, email)
            VALUES ($1, $2)
            RETURNING id, name, email, version, created_at, updated_at
            "#,
        )
        .bind(&user.name)
        .bind(&user.email)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.into())
    }

    /// Content change and version bump happen in one statement.
    async fn mutate(&self, id: i64, patch: UserPatch) -> Result<UserRecord, RepoError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            UPDATE users
            SET name = COALESCE($2, name),
                email = COALESCE($3, email),
                version = version + 1,
                updated_at = now()
            WHERE id = $1
            RETURNING id, name, email, version, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(patch.name.as_deref())
        .bind(patch.email.as_deref())
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(UserRecord::from).ok_or(RepoError::NotFound)
    }

    async fn delete(&self, id: i64) -> Result<(), RepoError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}
