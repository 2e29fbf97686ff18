use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

use crate::auth::CurrentUser;
use crate::broadcast::{Channel, Event};
use crate::errors::Result;
use crate::manager::{
    presence_manager::{PresenceManager, PresenceStatus},
    user_manager::UserManager,
    UserId,
};
use crate::AppState;

#[derive(Deserialize, Default)]
pub struct HeartbeatRequest {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

fn presence(state: &AppState) -> PresenceManager<'_> {
    PresenceManager::new(&state.pool, state.config.presence.online_window())
}

/// Records activity and announces the user if they just came online.
pub(crate) async fn record_heartbeat(
    state: &AppState,
    user_id: UserId,
    latitude: Option<f64>,
    longitude: Option<f64>,
) -> Result<PresenceStatus> {
    let manager = presence(state);
    let came_online = manager.heartbeat(user_id, latitude, longitude).await?;
    let status = manager.status(user_id).await?;
    if came_online {
        state.hub.publish(
            Channel::Presence,
            Event::PresenceChanged {
                user_id,
                online: true,
                last_seen: status.last_seen,
            },
        );
    }
    Ok(status)
}

/// Marks the user offline and announces it if they were online.
pub(crate) async fn record_offline(state: &AppState, user_id: UserId) -> Result<()> {
    let manager = presence(state);
    if manager.set_offline(user_id).await? {
        let status = manager.status(user_id).await?;
        state.hub.publish(
            Channel::Presence,
            Event::PresenceChanged {
                user_id,
                online: false,
                last_seen: status.last_seen,
            },
        );
    }
    Ok(())
}

#[tracing::instrument(skip_all)]
pub async fn heartbeat(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    body: Option<Json<HeartbeatRequest>>,
) -> Result<Json<PresenceStatus>> {
    let Json(req) = body.unwrap_or_default();
    Ok(Json(
        record_heartbeat(&state, user.id, req.latitude, req.longitude).await?,
    ))
}

pub async fn status(
    State(state): State<Arc<AppState>>,
    _: CurrentUser,
    Path(user_id): Path<UserId>,
) -> Result<Json<PresenceStatus>> {
    UserManager::new(&state.pool).get(user_id).await?;
    Ok(Json(presence(&state).status(user_id).await?))
}
