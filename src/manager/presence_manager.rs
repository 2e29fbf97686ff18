use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::{DbError, UserId};

#[derive(sqlx::FromRow, Debug, Clone)]
struct PresenceRow {
    user_id: UserId,
    online: bool,
    last_seen: DateTime<Utc>,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

/// Derived presence of one user.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PresenceStatus {
    pub user_id: UserId,
    pub online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl PresenceStatus {
    fn offline(user_id: UserId) -> Self {
        Self {
            user_id,
            online: false,
            last_seen: None,
            latitude: None,
            longitude: None,
        }
    }
}

pub struct PresenceManager<'a> {
    pool: &'a sqlx::SqlitePool,
    window: Duration,
}

impl<'a> PresenceManager<'a> {
    /// `window` is how long a heartbeat keeps a user online.
    pub fn new(pool: &'a sqlx::SqlitePool, window: Duration) -> Self {
        Self { pool, window }
    }
}

impl PresenceManager<'_> {
    /// Records activity. Returns `true` if the user was offline before this call.
    pub async fn heartbeat(
        &self,
        user_id: UserId,
        latitude: Option<f64>,
        longitude: Option<f64>,
    ) -> Result<bool, DbError> {
        let now = Utc::now();
        let was_online = self.status_at(user_id, now).await?.online;
        sqlx::query(
            "INSERT INTO presence(user_id, online, last_seen, latitude, longitude) VALUES (?, 1, ?, ?, ?) \
             ON CONFLICT(user_id) DO UPDATE SET online = 1, last_seen = excluded.last_seen, \
             latitude = COALESCE(excluded.latitude, presence.latitude), \
             longitude = COALESCE(excluded.longitude, presence.longitude)",
        )
        .bind(user_id)
        .bind(now)
        .bind(latitude)
        .bind(longitude)
        .execute(self.pool)
        .await?;
        Ok(!was_online)
    }

    /// Returns `true` if the user was online before this call.
    pub async fn set_offline(&self, user_id: UserId) -> Result<bool, DbError> {
        let was_online = self.status(user_id).await?.online;
        sqlx::query("UPDATE presence SET online = 0 WHERE user_id = ?")
            .bind(user_id)
            .execute(self.pool)
            .await?;
        Ok(was_online)
    }

    pub async fn status(&self, user_id: UserId) -> Result<PresenceStatus, DbError> {
        self.status_at(user_id, Utc::now()).await
    }

    async fn status_at(&self, user_id: UserId, now: DateTime<Utc>) -> Result<PresenceStatus, DbError> {
        let row = sqlx::query_as::<_, PresenceRow>("SELECT * FROM presence WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(self.pool)
            .await?;
        Ok(match row {
            Some(row) => PresenceStatus {
                user_id,
                online: row.online && now - row.last_seen <= self.window,
                last_seen: Some(row.last_seen),
                latitude: row.latitude,
                longitude: row.longitude,
            },
            None => PresenceStatus::offline(user_id),
        })
    }

    /// Flips stale online users to offline and returns each one with their last heartbeat.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<Vec<(UserId, DateTime<Utc>)>, DbError> {
        let rows = sqlx::query_as::<_, PresenceRow>("SELECT * FROM presence WHERE online = 1")
            .fetch_all(self.pool)
            .await?;

        let mut stale = Vec::new();
        for row in rows.into_iter().filter(|r| now - r.last_seen > self.window) {
            sqlx::query("UPDATE presence SET online = 0 WHERE user_id = ?")
                .bind(row.user_id)
                .execute(self.pool)
                .await?;
            stale.push((row.user_id, row.last_seen));
        }
        if !stale.is_empty() {
            tracing::debug!(count = stale.len(), "presence sweep marked users offline");
        }
        Ok(stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(pool: &sqlx::SqlitePool) -> PresenceManager<'_> {
        PresenceManager::new(pool, Duration::seconds(60))
    }

    #[sqlx::test(fixtures("users"))]
    async fn unknown_user_is_offline(pool: sqlx::SqlitePool) {
        let status = manager(&pool).status(2).await.unwrap();
        assert_eq!(status, PresenceStatus::offline(2));
    }

    #[sqlx::test(fixtures("users"))]
    async fn heartbeat_brings_user_online(pool: sqlx::SqlitePool) {
        let presence = manager(&pool);
        assert!(presence.heartbeat(2, Some(51.5), Some(-0.12)).await.unwrap());
        assert!(!presence.heartbeat(2, None, None).await.unwrap());

        let status = presence.status(2).await.unwrap();
        assert!(status.online);
        assert_eq!(status.latitude, Some(51.5));
        assert_eq!(status.longitude, Some(-0.12));

        assert!(presence.set_offline(2).await.unwrap());
        assert!(!presence.status(2).await.unwrap().online);
        assert!(!presence.set_offline(2).await.unwrap());
    }

    #[sqlx::test(fixtures("users"))]
    async fn sweep_expires_stale_users(pool: sqlx::SqlitePool) {
        let presence = manager(&pool);
        presence.heartbeat(1, None, None).await.unwrap();
        presence.heartbeat(2, None, None).await.unwrap();

        assert!(presence.sweep(Utc::now()).await.unwrap().is_empty());

        let later = Utc::now() + Duration::seconds(120);
        let mut swept = presence.sweep(later).await.unwrap();
        swept.sort();
        let ids: Vec<_> = swept.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 2]);
        for (id, last_seen) in swept {
            assert_eq!(presence.status(id).await.unwrap().last_seen, Some(last_seen));
        }
        assert!(presence.sweep(later).await.unwrap().is_empty());
    }

    #[sqlx::test(fixtures("users"))]
    async fn stale_flag_reads_offline(pool: sqlx::SqlitePool) {
        let stale = Utc::now() - Duration::seconds(300);
        sqlx::query("INSERT INTO presence(user_id, online, last_seen) VALUES (?, 1, ?)")
            .bind(4_i64)
            .bind(stale)
            .execute(&pool)
            .await
            .unwrap();
        let presence = manager(&pool);
        assert!(!presence.status(4).await.unwrap().online);
        assert!(presence.heartbeat(4, None, None).await.unwrap());
    }
}
