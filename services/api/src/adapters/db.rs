//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, the concrete implementation of
//! the `DatabaseService` and `HistoryRepository` ports from the `core` crate.
//! It handles all interactions with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use equation_ace_core::domain::{
    GraphSpec, HistoryRecord, NewHistoryRecord, PipelineShape, User, UserCredentials,
};
use equation_ace_core::ports::{DatabaseService, HistoryRepository, PortError, PortResult};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const HISTORY_COLUMNS: &str = "id, owner_id, raw_text, corrected_text, result_lines, \
     explanation_steps, is_plottable, function_expression, image_url, schema_version, created_at";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` and `HistoryRepository` ports.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    user_id: Uuid,
    email: String,
}
impl UserRecord {
    fn to_domain(self) -> User {
        User {
            user_id: self.user_id,
            email: self.email,
        }
    }
}

#[derive(FromRow)]
struct CredentialsRecord {
    user_id: Uuid,
    email: String,
    hashed_password: String,
}
impl CredentialsRecord {
    fn to_domain(self) -> UserCredentials {
        UserCredentials {
            user_id: self.user_id,
            email: self.email,
            hashed_password: self.hashed_password,
        }
    }
}

#[derive(FromRow)]
struct HistoryRow {
    id: Uuid,
    owner_id: Uuid,
    raw_text: Option<String>,
    corrected_text: String,
    result_lines: Vec<String>,
    explanation_steps: Vec<String>,
    is_plottable: Option<bool>,
    function_expression: Option<String>,
    image_url: Option<String>,
    schema_version: i16,
    created_at: DateTime<Utc>,
}
impl HistoryRow {
    fn to_domain(self) -> PortResult<HistoryRecord> {
        let schema = PipelineShape::from_schema_version(self.schema_version).ok_or_else(|| {
            PortError::Unexpected(format!(
                "History record {} has unknown schema version {}",
                self.id, self.schema_version
            ))
        })?;
        Ok(HistoryRecord {
            id: self.id,
            owner_id: self.owner_id,
            raw_text: self.raw_text,
            corrected_text: self.corrected_text,
            result_lines: self.result_lines,
            explanation_steps: self.explanation_steps,
            graph: self
                .is_plottable
                .map(|flag| GraphSpec::from_model(flag, self.function_expression.as_deref())),
            image_url: self.image_url,
            schema,
            created_at: self.created_at,
        })
    }
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn create_user_with_email(&self, email: &str, hashed_password: &str) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            "INSERT INTO users (user_id, email, hashed_password) VALUES ($1, $2, $3) \
             RETURNING user_id, email",
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(hashed_password)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                PortError::Conflict(format!("An account for {} already exists", email))
            }
            _ => unexpected(e),
        })?;
        Ok(record.to_domain())
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let record = sqlx::query_as::<_, CredentialsRecord>(
            "SELECT user_id, email, hashed_password FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("User {} not found", email)),
            _ => unexpected(e),
        })?;
        Ok(record.to_domain())
    }

    async fn get_user_by_id(&self, user_id: Uuid) -> PortResult<User> {
        let record =
            sqlx::query_as::<_, UserRecord>("SELECT user_id, email FROM users WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| match e {
                    sqlx::Error::RowNotFound => {
                        PortError::NotFound(format!("User {} not found", user_id))
                    }
                    _ => unexpected(e),
                })?;
        Ok(record.to_domain())
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT user_id FROM auth_sessions WHERE id = $1 AND expires_at > now()",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or(PortError::Unauthorized)
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }
}

//=========================================================================================
// `HistoryRepository` Trait Implementation
//=========================================================================================

#[async_trait]
impl HistoryRepository for DbAdapter {
    async fn insert_history_record(&self, record: NewHistoryRecord) -> PortResult<HistoryRecord> {
        let (is_plottable, function_expression) = match &record.graph {
            Some(graph) => (
                Some(graph.is_plottable()),
                graph.function_expression().map(str::to_string),
            ),
            None => (None, None),
        };

        let row = sqlx::query_as::<_, HistoryRow>(&format!(
            "INSERT INTO history_records (id, owner_id, raw_text, corrected_text, result_lines, \
             explanation_steps, is_plottable, function_expression, image_url, schema_version) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING {}",
            HISTORY_COLUMNS
        ))
        .bind(record.id)
        .bind(record.owner_id)
        .bind(record.raw_text)
        .bind(record.corrected_text)
        .bind(record.result_lines)
        .bind(record.explanation_steps)
        .bind(is_plottable)
        .bind(function_expression)
        .bind(record.image_url)
        .bind(record.schema.schema_version())
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        row.to_domain()
    }

    // Ordering is applied by the caller.
    async fn get_history_for_owner(&self, owner_id: Uuid) -> PortResult<Vec<HistoryRecord>> {
        let rows = sqlx::query_as::<_, HistoryRow>(&format!(
            "SELECT {} FROM history_records WHERE owner_id = $1",
            HISTORY_COLUMNS
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        rows.into_iter().map(HistoryRow::to_domain).collect()
    }

    async fn get_history_record(&self, record_id: Uuid) -> PortResult<HistoryRecord> {
        let row = sqlx::query_as::<_, HistoryRow>(&format!(
            "SELECT {} FROM history_records WHERE id = $1",
            HISTORY_COLUMNS
        ))
        .bind(record_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                PortError::NotFound(format!("History record {} not found", record_id))
            }
            _ => unexpected(e),
        })?;

        row.to_domain()
    }
}
