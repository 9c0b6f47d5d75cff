use std::str::FromStr;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, types::Json, FromRow, PgPool};
use time::OffsetDateTime;

use super::{Store, StoreError, StoreResult};
use crate::{
    analytics::repo_types::{Counter, Counters},
    applications::repo_types::{
        Application, ApplicationFilter, ApplicationPatch, HealthCheck, TrialDefaults,
    },
    requests::repo_types::{AccessRequest, Decision, RequestStatus},
    users::repo_types::{ApplicationEntry, Trial, User, UserFilter, UserMetadata, UserPatch},
};

const USER_COLUMNS: &str = "id, email, display_name, password_hash, role, status, applications, \
     trial, metadata, reset_token, reset_token_expires_at, created_at, updated_at, last_login_at";

const APPLICATION_COLUMNS: &str = "id, name, description, platform, auth_required, max_users, \
     current_users, trial_defaults, status, health_check, created_at, updated_at";

const REQUEST_COLUMNS: &str = "id, full_name, email, company, job_title, phone, application_id, \
     use_case, status, created_at, processed_at, processed_by, notes, user_id";

const COUNTERS_ID: &str = "counters";

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            _ => StoreError::Backend(anyhow::Error::new(e)),
        }
    }
}

fn parse_text<T: FromStr<Err = String>>(
    collection: &'static str,
    id: &str,
    value: &str,
) -> StoreResult<T> {
    value.parse().map_err(|reason| StoreError::Corrupt {
        collection,
        id: id.to_string(),
        reason,
    })
}

#[derive(FromRow)]
struct UserRow {
    id: String,
    email: String,
    display_name: String,
    password_hash: String,
    role: String,
    status: String,
    applications: Json<Vec<ApplicationEntry>>,
    trial: Option<Json<Trial>>,
    metadata: Json<UserMetadata>,
    reset_token: Option<String>,
    reset_token_expires_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
    last_login_at: Option<OffsetDateTime>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> StoreResult<Self> {
        Ok(User {
            role: parse_text("users", &row.id, &row.role)?,
            status: parse_text("users", &row.id, &row.status)?,
            id: row.id,
            email: row.email,
            display_name: row.display_name,
            password_hash: row.password_hash,
            applications: row.applications.0,
            trial: row.trial.map(|t| t.0),
            metadata: row.metadata.0,
            reset_token: row.reset_token,
            reset_token_expires_at: row.reset_token_expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_login_at: row.last_login_at,
        })
    }
}

#[derive(FromRow)]
struct ApplicationRow {
    id: String,
    name: String,
    description: String,
    platform: String,
    auth_required: bool,
    max_users: i64,
    current_users: i64,
    trial_defaults: Json<TrialDefaults>,
    status: String,
    health_check: Json<HealthCheck>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<ApplicationRow> for Application {
    type Error = StoreError;

    fn try_from(row: ApplicationRow) -> StoreResult<Self> {
        Ok(Application {
            platform: parse_text("applications", &row.id, &row.platform)?,
            status: parse_text("applications", &row.id, &row.status)?,
            id: row.id,
            name: row.name,
            description: row.description,
            auth_required: row.auth_required,
            max_users: row.max_users,
            current_users: row.current_users,
            trial_defaults: row.trial_defaults.0,
            health_check: row.health_check.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct RequestRow {
    id: String,
    full_name: String,
    email: String,
    company: String,
    job_title: String,
    phone: Option<String>,
    application_id: String,
    use_case: String,
    status: String,
    created_at: OffsetDateTime,
    processed_at: Option<OffsetDateTime>,
    processed_by: Option<String>,
    notes: Option<String>,
    user_id: Option<String>,
}

impl TryFrom<RequestRow> for AccessRequest {
    type Error = StoreError;

    fn try_from(row: RequestRow) -> StoreResult<Self> {
        Ok(AccessRequest {
            status: parse_text("access_requests", &row.id, &row.status)?,
            id: row.id,
            full_name: row.full_name,
            email: row.email,
            company: row.company,
            job_title: row.job_title,
            phone: row.phone,
            application_id: row.application_id,
            use_case: row.use_case,
            created_at: row.created_at,
            processed_at: row.processed_at,
            processed_by: row.processed_by,
            notes: row.notes,
            user_id: row.user_id,
        })
    }
}

#[derive(FromRow)]
struct CountersRow {
    approved_requests: i64,
    rejected_requests: i64,
    updated_at: Option<OffsetDateTime>,
}

fn collect<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Postgres-backed store. JSON-shaped members (application entries, trials,
/// metadata, health checks) live in JSONB columns.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("connect to database")?;

        if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
            tracing::warn!(error = %e, "migration failed; continuing");
        }

        Ok(Self { pool })
    }

    async fn write_user(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        user: &User,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET display_name = $2, role = $3, status = $4, applications = $5,
                trial = $6, metadata = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(&user.id)
        .bind(&user.display_name)
        .bind(user.role.as_str())
        .bind(user.status.as_str())
        .bind(Json(&user.applications))
        .bind(user.trial.as_ref().map(Json))
        .bind(Json(&user.metadata))
        .bind(user.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn lock_user(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        id: &str,
    ) -> StoreResult<User> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(StoreError::NotFound("User"))?;
        User::try_from(row)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn find_user(&self, id: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(User::try_from).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.map(User::try_from).transpose()
    }

    async fn list_users(&self, filter: &UserFilter) -> StoreResult<Vec<User>> {
        let sql = format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE ($1::text IS NULL OR role = $1)
              AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#
        );
        let rows = sqlx::query_as::<_, UserRow>(&sql)
            .bind(filter.role.map(|r| r.as_str()))
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.limit)
            .fetch_all(&self.pool)
            .await?;
        collect(rows)
    }

    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, display_name, password_hash, role, status,
                               applications, trial, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.status.as_str())
        .bind(Json(&user.applications))
        .bind(user.trial.as_ref().map(Json))
        .bind(Json(&user.metadata))
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_user(&self, id: &str, patch: UserPatch, now: OffsetDateTime) -> StoreResult<User> {
        let mut tx = self.pool.begin().await?;
        let mut user = Self::lock_user(&mut tx, id).await?;
        patch.apply(&mut user, now);
        Self::write_user(&mut tx, &user).await?;
        tx.commit().await?;
        Ok(user)
    }

    async fn upsert_user_application(
        &self,
        user_id: &str,
        entry: ApplicationEntry,
        now: OffsetDateTime,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let mut user = Self::lock_user(&mut tx, user_id).await?;
        user.upsert_application(entry, now);
        Self::write_user(&mut tx, &user).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_login(&self, user_id: &str, at: OffsetDateTime) -> StoreResult<()> {
        let done = sqlx::query("UPDATE users SET last_login_at = $2 WHERE id = $1")
            .bind(user_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound("User"));
        }
        Ok(())
    }

    async fn set_reset_token(
        &self,
        user_id: &str,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> StoreResult<()> {
        let done = sqlx::query(
            "UPDATE users SET reset_token = $2, reset_token_expires_at = $3 WHERE id = $1",
        )
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound("User"));
        }
        Ok(())
    }

    async fn delete_user(&self, id: &str) -> StoreResult<User> {
        let sql = format!("DELETE FROM users WHERE id = $1 RETURNING {USER_COLUMNS}");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("User"))?;
        User::try_from(row)
    }

    async fn delete_all_users(&self) -> StoreResult<u64> {
        let done = sqlx::query("DELETE FROM users").execute(&self.pool).await?;
        Ok(done.rows_affected())
    }

    async fn count_users(&self) -> StoreResult<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }

    async fn find_application(&self, id: &str) -> StoreResult<Option<Application>> {
        let sql = format!("SELECT {APPLICATION_COLUMNS} FROM applications WHERE id = $1");
        let row = sqlx::query_as::<_, ApplicationRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Application::try_from).transpose()
    }

    async fn find_application_by_name(&self, name: &str) -> StoreResult<Option<Application>> {
        let sql = format!("SELECT {APPLICATION_COLUMNS} FROM applications WHERE name = $1");
        let row = sqlx::query_as::<_, ApplicationRow>(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Application::try_from).transpose()
    }

    async fn list_applications(&self, filter: &ApplicationFilter) -> StoreResult<Vec<Application>> {
        let sql = format!(
            r#"
            SELECT {APPLICATION_COLUMNS}
            FROM applications
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR platform = $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#
        );
        let rows = sqlx::query_as::<_, ApplicationRow>(&sql)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.platform.map(|p| p.as_str()))
            .bind(filter.limit)
            .fetch_all(&self.pool)
            .await?;
        collect(rows)
    }

    async fn insert_application(&self, app: &Application) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO applications (id, name, description, platform, auth_required, max_users,
                                      current_users, trial_defaults, status, health_check,
                                      created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&app.id)
        .bind(&app.name)
        .bind(&app.description)
        .bind(app.platform.as_str())
        .bind(app.auth_required)
        .bind(app.max_users)
        .bind(app.current_users)
        .bind(Json(&app.trial_defaults))
        .bind(app.status.as_str())
        .bind(Json(&app.health_check))
        .bind(app.created_at)
        .bind(app.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_application(
        &self,
        id: &str,
        patch: ApplicationPatch,
        now: OffsetDateTime,
    ) -> StoreResult<Application> {
        let mut tx = self.pool.begin().await?;
        let sql = format!("SELECT {APPLICATION_COLUMNS} FROM applications WHERE id = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, ApplicationRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound("Application"))?;
        let mut app = Application::try_from(row)?;
        patch.apply(&mut app, now);

        sqlx::query(
            r#"
            UPDATE applications
            SET name = $2, description = $3, platform = $4, auth_required = $5, max_users = $6,
                current_users = $7, trial_defaults = $8, status = $9, health_check = $10,
                updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(&app.id)
        .bind(&app.name)
        .bind(&app.description)
        .bind(app.platform.as_str())
        .bind(app.auth_required)
        .bind(app.max_users)
        .bind(app.current_users)
        .bind(Json(&app.trial_defaults))
        .bind(app.status.as_str())
        .bind(Json(&app.health_check))
        .bind(app.updated_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(app)
    }

    async fn delete_application(&self, id: &str) -> StoreResult<Application> {
        let sql = format!("DELETE FROM applications WHERE id = $1 RETURNING {APPLICATION_COLUMNS}");
        let row = sqlx::query_as::<_, ApplicationRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("Application"))?;
        Application::try_from(row)
    }

    async fn delete_all_applications(&self) -> StoreResult<u64> {
        let done = sqlx::query("DELETE FROM applications")
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }

    async fn count_applications(&self) -> StoreResult<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM applications")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }

    async fn insert_request(&self, request: &AccessRequest) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO access_requests (id, full_name, email, company, job_title, phone,
                                         application_id, use_case, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&request.id)
        .bind(&request.full_name)
        .bind(&request.email)
        .bind(&request.company)
        .bind(&request.job_title)
        .bind(&request.phone)
        .bind(&request.application_id)
        .bind(&request.use_case)
        .bind(request.status.as_str())
        .bind(request.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_request(&self, id: &str) -> StoreResult<Option<AccessRequest>> {
        let sql = format!("SELECT {REQUEST_COLUMNS} FROM access_requests WHERE id = $1");
        let row = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(AccessRequest::try_from).transpose()
    }

    async fn list_requests(
        &self,
        status: Option<RequestStatus>,
        limit: i64,
    ) -> StoreResult<Vec<AccessRequest>> {
        let sql = format!(
            r#"
            SELECT {REQUEST_COLUMNS}
            FROM access_requests
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#
        );
        let rows = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(status.map(|s| s.as_str()))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        collect(rows)
    }

    async fn finalize_request(&self, id: &str, decision: &Decision) -> StoreResult<AccessRequest> {
        let sql = format!(
            r#"
            UPDATE access_requests
            SET status = $2, processed_at = $3, processed_by = $4, notes = $5, user_id = $6
            WHERE id = $1 AND status = 'pending'
            RETURNING {REQUEST_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(id)
            .bind(decision.status.as_str())
            .bind(decision.processed_at)
            .bind(&decision.processed_by)
            .bind(&decision.notes)
            .bind(&decision.user_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => AccessRequest::try_from(row),
            None => match self.find_request(id).await? {
                Some(current) => Err(StoreError::Conflict(format!(
                    "access request is already {}",
                    current.status
                ))),
                None => Err(StoreError::NotFound("Access request")),
            },
        }
    }

    async fn link_request_user(&self, id: &str, user_id: &str) -> StoreResult<()> {
        let done = sqlx::query("UPDATE access_requests SET user_id = $2 WHERE id = $1")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound("Access request"));
        }
        Ok(())
    }

    async fn count_requests(&self, status: RequestStatus) -> StoreResult<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM access_requests WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }

    async fn increment_counter(&self, counter: Counter, at: OffsetDateTime) -> StoreResult<()> {
        let (approved, rejected): (i64, i64) = match counter {
            Counter::ApprovedRequests => (1, 0),
            Counter::RejectedRequests => (0, 1),
        };
        sqlx::query(
            r#"
            INSERT INTO analytics_counters (id, approved_requests, rejected_requests, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET approved_requests = analytics_counters.approved_requests + EXCLUDED.approved_requests,
                rejected_requests = analytics_counters.rejected_requests + EXCLUDED.rejected_requests,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(COUNTERS_ID)
        .bind(approved)
        .bind(rejected)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn counters(&self) -> StoreResult<Counters> {
        let row = sqlx::query_as::<_, CountersRow>(
            r#"
            SELECT approved_requests, rejected_requests, updated_at
            FROM analytics_counters
            WHERE id = $1
            "#,
        )
        .bind(COUNTERS_ID)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(|r| Counters {
                approved_requests: r.approved_requests,
                rejected_requests: r.rejected_requests,
                updated_at: r.updated_at,
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_enum_text_is_reported_as_corrupt() {
        let err = parse_text::<crate::users::repo_types::Role>("users", "u1", "root").unwrap_err();
        match err {
            StoreError::Corrupt { collection, id, .. } => {
                assert_eq!(collection, "users");
                assert_eq!(id, "u1");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn row_not_found_is_a_backend_error() {
        let err = StoreError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, StoreError::Backend(_)));
    }
}
