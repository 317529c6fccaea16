use std::str::FromStr;
use std::time::Duration;

use moka::future::Cache;
use sqlx::{FromRow, MySqlConnection, MySqlPool};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::model::{role::Role, user::User};

/// What the gate knows about a live session.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub session_id: String,
    pub user_id: u64,
    pub username: String,
    pub role: Role,
    pub department_id: Option<u64>,
    pub csrf_token: String,
}

#[derive(FromRow)]
struct SessionRow {
    session_id: String,
    user_id: u64,
    username: String,
    role: String,
    department_id: Option<u64>,
    csrf_token: String,
}

/// Client metadata recorded with a new session.
#[derive(Debug, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub device: Option<String>,
}

/// Live sessions, cached in memory in front of `user_sessions`.
///
/// The table is the source of truth: a cache miss falls back to it, and
/// closing a session updates the row before evicting the entry.
#[derive(Clone)]
pub struct SessionStore {
    cache: Cache<String, SessionState>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(50_000)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Records a login and returns the new session.
    pub async fn open(
        &self,
        pool: &MySqlPool,
        user: &User,
        role: Role,
        client: ClientInfo,
    ) -> Result<SessionState, sqlx::Error> {
        let state = SessionState {
            session_id: Uuid::new_v4().to_string(),
            user_id: user.id,
            username: user.username.clone(),
            role,
            department_id: user.department_id,
            csrf_token: Uuid::new_v4().to_string(),
        };

        sqlx::query(
            r#"
            INSERT INTO user_sessions
                (id, user_id, username, login_time, ip_address, device, is_active, csrf_token)
            VALUES (?, ?, ?, NOW(), ?, ?, 1, ?)
            "#,
        )
        .bind(&state.session_id)
        .bind(state.user_id)
        .bind(&state.username)
        .bind(client.ip_address)
        .bind(client.device)
        .bind(&state.csrf_token)
        .execute(pool)
        .await?;

        self.cache
            .insert(state.session_id.clone(), state.clone())
            .await;

        debug!(user_id = state.user_id, session_id = %state.session_id, "Session opened");
        Ok(state)
    }

    /// Looks up an active session of an active user.
    pub async fn resolve(
        &self,
        pool: &MySqlPool,
        session_id: &str,
    ) -> Result<Option<SessionState>, sqlx::Error> {
        if let Some(state) = self.cache.get(session_id).await {
            return Ok(Some(state));
        }

        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT s.id AS session_id, s.user_id, s.username, u.role, u.department_id, s.csrf_token
            FROM user_sessions s
            JOIN users u ON u.id = s.user_id
            WHERE s.id = ?
            AND s.is_active = 1
            AND u.is_active = 1
            "#,
        )
        .bind(session_id)
        .fetch_optional(pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let role = match Role::from_str(&row.role) {
            Ok(role) => role,
            Err(_) => {
                warn!(user_id = row.user_id, role = %row.role, "Session user has an unknown role");
                return Ok(None);
            }
        };

        let state = SessionState {
            session_id: row.session_id,
            user_id: row.user_id,
            username: row.username,
            role,
            department_id: row.department_id,
            csrf_token: row.csrf_token,
        };
        self.cache
            .insert(state.session_id.clone(), state.clone())
            .await;
        Ok(Some(state))
    }

    /// Marks the session logged out. Returns false if it was already closed.
    pub async fn close(&self, pool: &MySqlPool, session_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE user_sessions
            SET is_active = 0,
                logout_time = NOW(),
                duration_seconds = TIMESTAMPDIFF(SECOND, login_time, NOW())
            WHERE id = ?
            AND is_active = 1
            "#,
        )
        .bind(session_id)
        .execute(pool)
        .await?;

        self.cache.invalidate(session_id).await;
        Ok(result.rows_affected() > 0)
    }

    /// Closes every open session of `user_id` on the given connection,
    /// usually inside the caller's transaction. Returns the closed ids so
    /// they can be evicted once the transaction commits.
    pub async fn close_all_for_user(
        conn: &mut MySqlConnection,
        user_id: u64,
    ) -> Result<Vec<String>, sqlx::Error> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT id FROM user_sessions WHERE user_id = ? AND is_active = 1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_all(&mut *conn)
        .await?;

        if ids.is_empty() {
            return Ok(ids);
        }

        sqlx::query(
            r#"
            UPDATE user_sessions
            SET is_active = 0,
                logout_time = NOW(),
                duration_seconds = TIMESTAMPDIFF(SECOND, login_time, NOW())
            WHERE user_id = ?
            AND is_active = 1
            "#,
        )
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

        Ok(ids)
    }

    pub async fn evict(&self, session_ids: &[String]) {
        for id in session_ids {
            self.cache.invalidate(id).await;
        }
    }

    #[cfg(test)]
    pub async fn remember(&self, state: SessionState) {
        self.cache.insert(state.session_id.clone(), state).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(id: &str) -> SessionState {
        SessionState {
            session_id: id.to_string(),
            user_id: 1,
            username: "alice".to_string(),
            role: Role::Doer,
            department_id: Some(3),
            csrf_token: "csrf".to_string(),
        }
    }

    #[actix_web::test]
    async fn cached_sessions_resolve_without_the_store() {
        let pool = MySqlPool::connect_lazy("mysql://nobody@127.0.0.1:1/none").unwrap();
        let store = SessionStore::new(Duration::from_secs(60));
        store.remember(state("s-1")).await;

        let found = store.resolve(&pool, "s-1").await.unwrap().unwrap();
        assert_eq!(found.username, "alice");
        assert_eq!(found.role, Role::Doer);
    }

    #[actix_web::test]
    async fn evicted_sessions_leave_the_cache() {
        let store = SessionStore::new(Duration::from_secs(60));
        store.remember(state("s-2")).await;
        store.evict(&["s-2".to_string()]).await;
        assert!(store.cache.get("s-2").await.is_none());
    }
}
