//! JSON REST surface under `/api`, plus the WebSocket endpoint.

use std::sync::Arc;

use axum::{routing, Router};

use crate::AppState;

pub mod admin;
pub mod auth;
pub mod chat;
pub mod presence;
pub mod properties;
pub mod ws;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/register", routing::post(auth::register))
        .route("/auth/login", routing::post(auth::login))
        .route("/auth/logout", routing::post(auth::logout))
        .route("/auth/me", routing::get(auth::me))
        .route(
            "/properties",
            routing::get(properties::list).post(properties::create),
        )
        .route("/properties/mine", routing::get(properties::mine))
        .route(
            "/properties/:id",
            routing::get(properties::get)
                .put(properties::update)
                .delete(properties::delete),
        )
        .route("/properties/:id/status", routing::patch(properties::set_status))
        .route("/properties/:id/images", routing::post(properties::upload_images))
        .route(
            "/properties/:id/images/:image_id",
            routing::delete(properties::delete_image),
        )
        .route("/admin/properties", routing::get(admin::list_properties))
        .route("/admin/properties/:id/approve", routing::post(admin::approve))
        .route("/admin/properties/:id/reject", routing::post(admin::reject))
        .route("/admin/users", routing::get(admin::list_users))
        .route("/admin/users/:id/role", routing::patch(admin::set_role))
        .route(
            "/chat-rooms",
            routing::get(chat::list_rooms).post(chat::open_room),
        )
        .route("/chat-rooms/unread", routing::get(chat::unread))
        .route(
            "/chat-rooms/:id/messages",
            routing::get(chat::list_messages).post(chat::send_message),
        )
        .route("/chat-rooms/:id/read", routing::post(chat::mark_read))
        .route("/presence/heartbeat", routing::post(presence::heartbeat))
        .route("/users/:id/status", routing::get(presence::status))
}
