use serde::Serialize;
use sqlx::sqlite::SqlitePool;

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

/// A stored identity with its derived roles and permissions.
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub password_hash: String,
    pub enabled: bool,
    /// Persisted copy of the failure count; the cache counter is authoritative.
    pub failure_count: u32,
    /// When the account was locked (Unix milliseconds).
    pub lock_time_ms: Option<i64>,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

/// Fields needed to insert a user.
#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: Option<&'a str>,
    pub password_hash: &'a str,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    email: Option<String>,
    password_hash: String,
    status: i32,
    login_fail_count: i64,
    lock_time: Option<i64>,
}

/// Public user summary for the admin listing. Never exposes credentials.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub enabled: bool,
    pub locked: bool,
    pub created_at: String,
}

#[derive(sqlx::FromRow)]
struct UserSummaryRow {
    id: i64,
    username: String,
    email: Option<String>,
    status: i32,
    lock_time: Option<i64>,
    created_at: String,
}

impl From<UserSummaryRow> for UserSummary {
    fn from(row: UserSummaryRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            email: row.email,
            enabled: row.status != 0,
            locked: row.lock_time.is_some(),
            created_at: row.created_at,
        }
    }
}

const USER_COLUMNS: &str =
    "id, username, email, password_hash, status, login_fail_count, lock_time";

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new enabled user. Returns the user ID.
    pub async fn create(&self, user: &NewUser<'_>) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO users (username, email, password_hash, status, login_fail_count, deleted)
             VALUES (?, ?, ?, 1, 0, 0)",
        )
        .bind(user.username)
        .bind(user.email)
        .bind(user.password_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Grant a role by code. Granting a role twice is a no-op.
    pub async fn assign_role(&self, user_id: i64, role_code: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO user_roles (user_id, role_id)
             SELECT ?, id FROM roles WHERE code = ?",
        )
        .bind(user_id)
        .bind(role_code)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Find a non-deleted user by username.
    pub async fn find_by_username(&self, username: &str) -> Result<Option<Principal>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE username = ? AND deleted = 0",
            USER_COLUMNS
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        self.load(row).await
    }

    /// Find a non-deleted user by email.
    pub async fn find_by_email(&self, email: &str) -> Result<Option<Principal>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE email = ? AND deleted = 0",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        self.load(row).await
    }

    /// Find a non-deleted user by ID.
    pub async fn find_by_id(&self, id: i64) -> Result<Option<Principal>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE id = ? AND deleted = 0",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        self.load(row).await
    }

    /// Whether a username is taken, including by soft-deleted users.
    pub async fn username_exists(&self, username: &str) -> Result<bool, sqlx::Error> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE username = ?")
            .bind(username)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0 > 0)
    }

    /// Whether an email is taken, including by soft-deleted users.
    pub async fn email_exists(&self, email: &str) -> Result<bool, sqlx::Error> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE email = ?")
            .bind(email)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0 > 0)
    }

    pub async fn update_failure_count(&self, id: i64, count: u32) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE users SET login_fail_count = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(i64::from(count))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persist a lock taken at `locked_at_ms` together with the failure count
    /// that triggered it.
    pub async fn lock(&self, id: i64, locked_at_ms: i64, failures: u32) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE users SET lock_time = ?, login_fail_count = ?, updated_at = datetime('now')
             WHERE id = ?",
        )
        .bind(locked_at_ms)
        .bind(i64::from(failures))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Clear the lock and the persisted failure count.
    pub async fn unlock(&self, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE users SET lock_time = NULL, login_fail_count = 0, updated_at = datetime('now')
             WHERE id = ?",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_enabled(&self, id: i64, enabled: bool) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET status = ?, updated_at = datetime('now') WHERE id = ? AND deleted = 0",
        )
        .bind(i32::from(enabled))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn update_password(&self, id: i64, password_hash: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE users SET password_hash = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(password_hash)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark a user deleted. Rows are never physically removed.
    pub async fn soft_delete(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET deleted = 1, updated_at = datetime('now') WHERE id = ? AND deleted = 0",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List all non-deleted users (for the admin listing).
    pub async fn list_active(&self) -> Result<Vec<UserSummary>, sqlx::Error> {
        let rows: Vec<UserSummaryRow> = sqlx::query_as(
            "SELECT id, username, email, status, lock_time, created_at FROM users
             WHERE deleted = 0 ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(UserSummary::from).collect())
    }

    async fn load(&self, row: Option<UserRow>) -> Result<Option<Principal>, sqlx::Error> {
        let Some(row) = row else {
            return Ok(None);
        };

        let roles: Vec<(String,)> = sqlx::query_as(
            "SELECT r.code FROM roles r
             JOIN user_roles ur ON ur.role_id = r.id
             WHERE ur.user_id = ? ORDER BY r.id",
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await?;

        let permissions: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT p.code FROM permissions p
             JOIN role_permissions rp ON rp.permission_id = p.id
             JOIN user_roles ur ON ur.role_id = rp.role_id
             WHERE ur.user_id = ? ORDER BY p.code",
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(Principal {
            id: row.id,
            username: row.username,
            email: row.email,
            password_hash: row.password_hash,
            enabled: row.status != 0,
            failure_count: u32::try_from(row.login_fail_count).unwrap_or(0),
            lock_time_ms: row.lock_time,
            roles: roles.into_iter().map(|r| r.0).collect(),
            permissions: permissions.into_iter().map(|p| p.0).collect(),
        }))
    }
}
