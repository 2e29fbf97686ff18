use std::fmt::Display;

use super::{DbError, User};
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;

const SESSION_ID_LEN: usize = 13;

#[derive(sqlx::Type, Debug, Clone, PartialEq, Eq)]
#[sqlx(transparent)]
pub struct SessionId(pub String);

impl Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("session does not exist")]
    DoesNotExist,
    #[error(transparent)]
    DatabaseError(DbError),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::DoesNotExist,
            _ => Error::DatabaseError(err.into()),
        }
    }
}

fn random_session_id() -> SessionId {
    let mut rng = rand::thread_rng();
    SessionId(
        (0..SESSION_ID_LEN)
            .map(|_| rng.sample(Alphanumeric))
            .map(char::from)
            .collect::<String>(),
    )
}

#[derive(Clone)]
pub struct SessionManager<'a> {
    pool: &'a sqlx::SqlitePool,
}

impl<'a> SessionManager<'a> {
    pub fn new(pool: &'a sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

impl SessionManager<'_> {
    pub async fn get_user(&self, session_id: &SessionId) -> Result<User, Error> {
        Ok(sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE id = (SELECT user_id FROM user_sessions WHERE session_id = ?)",
        )
        .bind(session_id)
        .fetch_one(self.pool)
        .await?)
    }

    pub async fn generate_session_id_for(&self, user: &User) -> Result<SessionId, Error> {
        let sid = random_session_id();
        sqlx::query("INSERT INTO user_sessions(session_id, user_id, created_at) VALUES (?, ?, ?)")
            .bind(&sid)
            .bind(user.id)
            .bind(Utc::now())
            .execute(self.pool)
            .await?;

        Ok(sid)
    }

    pub async fn delete(&self, session_id: &SessionId) -> Result<(), Error> {
        let result = sqlx::query("DELETE FROM user_sessions WHERE session_id = ?")
            .bind(session_id)
            .execute(self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::DoesNotExist);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::login_manager::LoginManager;

    #[sqlx::test(fixtures("users", "sessions"))]
    async fn ok_get_user(pool: sqlx::SqlitePool) {
        let user = SessionManager::new(&pool)
            .get_user(&SessionId("f15wQrWboFNBW".into()))
            .await
            .unwrap();
        assert_eq!(user.email, "seller@example.com");
    }

    #[sqlx::test(fixtures("users"))]
    async fn err_unknown_session(pool: sqlx::SqlitePool) {
        assert!(matches!(
            SessionManager::new(&pool)
                .get_user(&SessionId("nope".into()))
                .await,
            Err(Error::DoesNotExist)
        ));
    }

    #[sqlx::test]
    async fn ok_retrieve_user_from_generated_session_id(pool: sqlx::SqlitePool) {
        let user = LoginManager::new(&pool)
            .new_user("Test", "test123@example.com", "test1234", "test1234")
            .await
            .unwrap();
        let session_manager = SessionManager::new(&pool);
        let sid = session_manager.generate_session_id_for(&user).await.unwrap();
        assert_eq!(sid.0.len(), SESSION_ID_LEN);
        assert_eq!(session_manager.get_user(&sid).await.unwrap().id, user.id);
    }

    #[sqlx::test(fixtures("users", "sessions"))]
    async fn delete_logs_out(pool: sqlx::SqlitePool) {
        let manager = SessionManager::new(&pool);
        let sid = SessionId("f15wQrWboFNBW".into());
        manager.delete(&sid).await.unwrap();
        assert!(matches!(manager.get_user(&sid).await, Err(Error::DoesNotExist)));
        assert!(matches!(manager.delete(&sid).await, Err(Error::DoesNotExist)));
    }
}
