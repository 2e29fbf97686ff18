use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{
    ApprovalStatus, ChatMessage, ChatRoom, DbError, FieldError, Property, RoomId, User, UserId,
};

pub const MAX_MESSAGE_LEN: usize = 2000;
pub const DEFAULT_PAGE: i64 = 50;

/// A room as shown in a participant's inbox.
#[derive(sqlx::FromRow, Serialize, Debug, Clone)]
pub struct RoomSummary {
    pub id: RoomId,
    pub property_id: i64,
    pub property_title: String,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub counterpart_id: UserId,
    pub counterpart_name: String,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread: i64,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("chat room {0} not found")]
    NotFound(RoomId),
    #[error("not a participant of this chat room")]
    NotParticipant,
    #[error("cannot open a chat on your own listing")]
    OwnListing,
    #[error("listing is not open for enquiries")]
    ListingNotApproved,
    #[error("invalid message")]
    Invalid(Vec<FieldError>),
    #[error(transparent)]
    DatabaseError(DbError),
}

impl From<sqlx::Error> for Error {
    fn from(value: sqlx::Error) -> Self {
        Error::DatabaseError(value.into())
    }
}

pub struct ChatManager<'a> {
    pool: &'a sqlx::SqlitePool,
}

impl<'a> ChatManager<'a> {
    pub fn new(pool: &'a sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

fn clean_body(body: &str) -> Result<&str, Error> {
    let body = body.trim();
    let len = body.chars().count();
    if len == 0 || len > MAX_MESSAGE_LEN {
        return Err(Error::Invalid(vec![FieldError {
            field: "body",
            message: format!("Message must be between 1 and {MAX_MESSAGE_LEN} characters"),
        }]));
    }
    Ok(body)
}

impl ChatManager<'_> {
    /// Returns the buyer's room for this listing, creating it on first contact.
    /// The flag is `true` when the room was created.
    pub async fn open_room(&self, property: &Property, buyer: &User) -> Result<(ChatRoom, bool), Error> {
        if property.owner_id == buyer.id {
            return Err(Error::OwnListing);
        }
        if property.approval_status != ApprovalStatus::Approved {
            return Err(Error::ListingNotApproved);
        }

        let inserted = sqlx::query(
            "INSERT INTO chat_rooms(property_id, buyer_id, seller_id, created_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(property_id, buyer_id) DO NOTHING",
        )
        .bind(property.id)
        .bind(buyer.id)
        .bind(property.owner_id)
        .bind(Utc::now())
        .execute(self.pool)
        .await?
        .rows_affected()
            == 1;

        let room = sqlx::query_as::<_, ChatRoom>(
            "SELECT * FROM chat_rooms WHERE property_id = ? AND buyer_id = ?",
        )
        .bind(property.id)
        .bind(buyer.id)
        .fetch_one(self.pool)
        .await?;

        if inserted {
            tracing::info!(room_id = room.id, property_id = property.id, "chat room opened");
        }
        Ok((room, inserted))
    }

    pub async fn get_room(&self, id: RoomId) -> Result<ChatRoom, Error> {
        sqlx::query_as::<_, ChatRoom>("SELECT * FROM chat_rooms WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await?
            .ok_or(Error::NotFound(id))
    }

    pub async fn participant_room(&self, id: RoomId, user: &User) -> Result<ChatRoom, Error> {
        let room = self.get_room(id).await?;
        if room.has_participant(user.id) {
            Ok(room)
        } else {
            Err(Error::NotParticipant)
        }
    }

    pub async fn rooms_for(&self, user: &User) -> Result<Vec<RoomSummary>, Error> {
        Ok(sqlx::query_as::<_, RoomSummary>(
            "SELECT r.id, r.property_id, p.title AS property_title, r.buyer_id, r.seller_id, \
                    u.id AS counterpart_id, u.name AS counterpart_name, \
                    (SELECT body FROM messages m WHERE m.room_id = r.id ORDER BY m.id DESC LIMIT 1) AS last_message, \
                    (SELECT created_at FROM messages m WHERE m.room_id = r.id ORDER BY m.id DESC LIMIT 1) AS last_message_at, \
                    (SELECT COUNT(*) FROM messages m \
                      WHERE m.room_id = r.id AND m.sender_id != ?1 AND m.read_at IS NULL) AS unread \
             FROM chat_rooms r \
             JOIN properties p ON p.id = r.property_id \
             JOIN users u ON u.id = CASE WHEN r.buyer_id = ?1 THEN r.seller_id ELSE r.buyer_id END \
             WHERE r.buyer_id = ?1 OR r.seller_id = ?1 \
             ORDER BY COALESCE((SELECT MAX(m.id) FROM messages m WHERE m.room_id = r.id), 0) DESC, r.id DESC",
        )
        .bind(user.id)
        .fetch_all(self.pool)
        .await?)
    }

    /// Stores a message. A repeated `client_id` from the same sender returns the stored copy;
    /// the flag is `true` only when a new row was written.
    pub async fn new_chat(
        &self,
        user: &User,
        room: &ChatRoom,
        body: &str,
        client_id: Option<&str>,
    ) -> Result<(ChatMessage, bool), Error> {
        if !room.has_participant(user.id) {
            return Err(Error::NotParticipant);
        }
        let body = clean_body(body)?;
        let client_id = client_id.map(str::trim).filter(|c| !c.is_empty());

        if let Some(existing) = self.find_by_client_id(user, room, client_id).await? {
            return Ok((existing, false));
        }

        let inserted = sqlx::query_as::<_, ChatMessage>(
            "INSERT INTO messages(room_id, sender_id, body, client_id, created_at) VALUES (?, ?, ?, ?, ?) \
             RETURNING *",
        )
        .bind(room.id)
        .bind(user.id)
        .bind(body)
        .bind(client_id)
        .bind(Utc::now())
        .fetch_one(self.pool)
        .await;

        match inserted {
            Ok(message) => Ok((message, true)),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                // Lost a race with the same client retry.
                let existing = self.find_by_client_id(user, room, client_id).await?;
                existing.map(|m| (m, false)).ok_or(Error::NotFound(room.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_client_id(
        &self,
        user: &User,
        room: &ChatRoom,
        client_id: Option<&str>,
    ) -> Result<Option<ChatMessage>, Error> {
        let Some(client_id) = client_id else {
            return Ok(None);
        };
        Ok(sqlx::query_as::<_, ChatMessage>(
            "SELECT * FROM messages WHERE room_id = ? AND sender_id = ? AND client_id = ?",
        )
        .bind(room.id)
        .bind(user.id)
        .bind(client_id)
        .fetch_optional(self.pool)
        .await?)
    }

    /// A page of messages older than `before_id`, oldest first.
    pub async fn list_chats(
        &self,
        room: &ChatRoom,
        before_id: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Vec<ChatMessage>, Error> {
        let limit = limit.unwrap_or(DEFAULT_PAGE).clamp(1, 200);
        let mut messages = sqlx::query_as::<_, ChatMessage>(
            "SELECT * FROM messages WHERE room_id = ? AND id < ? ORDER BY id DESC LIMIT ?",
        )
        .bind(room.id)
        .bind(before_id.unwrap_or(i64::MAX))
        .bind(limit)
        .fetch_all(self.pool)
        .await?;
        messages.reverse();
        Ok(messages)
    }

    /// Marks everything the other participant sent as read.
    pub async fn mark_read(&self, room: &ChatRoom, reader: &User) -> Result<u64, Error> {
        if !room.has_participant(reader.id) {
            return Err(Error::NotParticipant);
        }
        let result = sqlx::query(
            "UPDATE messages SET read_at = ? WHERE room_id = ? AND sender_id != ? AND read_at IS NULL",
        )
        .bind(Utc::now())
        .bind(room.id)
        .bind(reader.id)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn unread_count(&self, room: &ChatRoom, user_id: UserId) -> Result<i64, Error> {
        Ok(sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM messages WHERE room_id = ? AND sender_id != ? AND read_at IS NULL",
        )
        .bind(room.id)
        .bind(user_id)
        .fetch_one(self.pool)
        .await?)
    }

    pub async fn total_unread(&self, user_id: UserId) -> Result<i64, Error> {
        Ok(sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM messages m JOIN chat_rooms r ON r.id = m.room_id \
             WHERE (r.buyer_id = ?1 OR r.seller_id = ?1) AND m.sender_id != ?1 AND m.read_at IS NULL",
        )
        .bind(user_id)
        .fetch_one(self.pool)
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::{
        property_manager::PropertyManager, user_manager::UserManager,
    };

    async fn user(pool: &sqlx::SqlitePool, id: i64) -> User {
        UserManager::new(pool).get(id).await.unwrap()
    }

    async fn property(pool: &sqlx::SqlitePool, id: i64) -> Property {
        PropertyManager::new(pool).get(id).await.unwrap()
    }

    #[sqlx::test(fixtures("users", "properties"))]
    async fn open_room_is_idempotent(pool: sqlx::SqlitePool) {
        let manager = ChatManager::new(&pool);
        let buyer = user(&pool, 2).await;
        let listing = property(&pool, 1).await;

        let (room, created) = manager.open_room(&listing, &buyer).await.unwrap();
        assert!(created);
        assert_eq!((room.buyer_id, room.seller_id), (2, 1));

        let (again, created) = manager.open_room(&listing, &buyer).await.unwrap();
        assert!(!created);
        assert_eq!(again.id, room.id);
    }

    #[sqlx::test(fixtures("users", "properties"))]
    async fn open_room_guards(pool: sqlx::SqlitePool) {
        let manager = ChatManager::new(&pool);
        let seller = user(&pool, 1).await;
        let buyer = user(&pool, 2).await;
        assert!(matches!(
            manager.open_room(&property(&pool, 1).await, &seller).await,
            Err(Error::OwnListing)
        ));
        assert!(matches!(
            manager.open_room(&property(&pool, 3).await, &buyer).await,
            Err(Error::ListingNotApproved)
        ));
    }

    #[sqlx::test(fixtures("users", "properties", "chat"))]
    async fn unread_counts_per_side(pool: sqlx::SqlitePool) {
        let manager = ChatManager::new(&pool);
        let room = manager.get_room(1).await.unwrap();
        assert_eq!(manager.unread_count(&room, 1).await.unwrap(), 2);
        assert_eq!(manager.unread_count(&room, 2).await.unwrap(), 1);
        assert_eq!(manager.total_unread(1).await.unwrap(), 3);

        let seller = user(&pool, 1).await;
        assert_eq!(manager.mark_read(&room, &seller).await.unwrap(), 2);
        assert_eq!(manager.mark_read(&room, &seller).await.unwrap(), 0);
        assert_eq!(manager.total_unread(1).await.unwrap(), 1);
        assert_eq!(manager.unread_count(&room, 2).await.unwrap(), 1);
    }

    #[sqlx::test(fixtures("users", "properties", "chat"))]
    async fn new_chat_dedups_by_client_id(pool: sqlx::SqlitePool) {
        let manager = ChatManager::new(&pool);
        let room = manager.get_room(1).await.unwrap();
        let buyer = user(&pool, 2).await;

        let (first, created) = manager
            .new_chat(&buyer, &room, "  See you then  ", Some("c-3"))
            .await
            .unwrap();
        assert!(created);
        assert_eq!(first.body, "See you then");

        let (second, created) = manager
            .new_chat(&buyer, &room, "See you then", Some("c-3"))
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(second.id, first.id);

        let (_, created) = manager.new_chat(&buyer, &room, "No id", None).await.unwrap();
        assert!(created);
        let (_, created) = manager.new_chat(&buyer, &room, "No id", None).await.unwrap();
        assert!(created);
    }

    #[sqlx::test(fixtures("users", "properties", "chat"))]
    async fn new_chat_rejects_outsiders_and_blank(pool: sqlx::SqlitePool) {
        let manager = ChatManager::new(&pool);
        let room = manager.get_room(1).await.unwrap();
        let outsider = user(&pool, 4).await;
        let buyer = user(&pool, 2).await;
        assert!(matches!(
            manager.new_chat(&outsider, &room, "hi", None).await,
            Err(Error::NotParticipant)
        ));
        assert!(matches!(
            manager.new_chat(&buyer, &room, "   ", None).await,
            Err(Error::Invalid(_))
        ));
        let long = "x".repeat(MAX_MESSAGE_LEN + 1);
        assert!(matches!(
            manager.new_chat(&buyer, &room, &long, None).await,
            Err(Error::Invalid(_))
        ));
        assert!(matches!(
            manager.participant_room(1, &outsider).await,
            Err(Error::NotParticipant)
        ));
    }

    #[sqlx::test(fixtures("users", "properties", "chat"))]
    async fn list_chats_pages_backwards(pool: sqlx::SqlitePool) {
        let manager = ChatManager::new(&pool);
        let room = manager.get_room(1).await.unwrap();
        let latest = manager.list_chats(&room, None, Some(2)).await.unwrap();
        assert_eq!(latest.iter().map(|m| m.id).collect::<Vec<_>>(), vec![2, 3]);
        let older = manager.list_chats(&room, Some(2), None).await.unwrap();
        assert_eq!(older.iter().map(|m| m.id).collect::<Vec<_>>(), vec![1]);
    }

    #[sqlx::test(fixtures("users", "properties", "chat"))]
    async fn rooms_for_orders_by_activity(pool: sqlx::SqlitePool) {
        let manager = ChatManager::new(&pool);
        let seller = user(&pool, 1).await;
        let rooms = manager.rooms_for(&seller).await.unwrap();
        assert_eq!(rooms.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2, 1]);
        assert_eq!(rooms[0].counterpart_name, "Otto Other");
        assert_eq!(rooms[0].unread, 1);
        assert_eq!(rooms[1].last_message.as_deref(), Some("Yes, Saturday works."));
        assert_eq!(rooms[1].unread, 2);

        let buyer = user(&pool, 2).await;
        let rooms = manager.rooms_for(&buyer).await.unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].counterpart_id, 1);
        assert_eq!(rooms[0].property_title, "Sunny family house");
    }
}
