use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::{CurrentUser, MaybeUser};
use crate::broadcast::{Channel, Event};
use crate::errors::{Error, Result};
use crate::manager::{
    property_manager::{NewProperty, PropertyFilter, PropertyManager, PropertyUpdate},
    ListingStatus, Page, Property, PropertyId, PropertyImage,
};
use crate::{uploads, AppState};

/// A listing with its images.
#[derive(Serialize)]
pub struct PropertyDetail {
    #[serde(flatten)]
    pub property: Property,
    pub images: Vec<PropertyImage>,
}

#[derive(Deserialize)]
pub struct StatusRequest {
    status: ListingStatus,
}

pub(crate) fn announce_status(state: &AppState, property: &Property) {
    state.hub.publish(
        Channel::User(property.owner_id),
        Event::PropertyStatusChanged {
            property_id: property.id,
            status: property.status,
            approval_status: property.approval_status,
        },
    );
}

#[tracing::instrument(skip_all)]
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<PropertyFilter>,
) -> Result<Json<Page<Property>>> {
    Ok(Json(PropertyManager::new(&state.pool).search(&filter).await?))
}

#[tracing::instrument(skip_all)]
pub async fn create(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(new): Json<NewProperty>,
) -> Result<(StatusCode, Json<Property>)> {
    let property = PropertyManager::new(&state.pool).create(&user, new).await?;
    Ok((StatusCode::CREATED, Json(property)))
}

pub async fn mine(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Property>>> {
    Ok(Json(PropertyManager::new(&state.pool).list_for_owner(&user).await?))
}

#[tracing::instrument(skip(state, user))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    MaybeUser(user): MaybeUser,
    Path(id): Path<PropertyId>,
) -> Result<Json<PropertyDetail>> {
    let manager = PropertyManager::new(&state.pool);
    let property = manager.get_visible(id, user.as_ref()).await?;
    let images = manager.images(id).await?;
    Ok(Json(PropertyDetail { property, images }))
}

#[tracing::instrument(skip(state, user, update))]
pub async fn update(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<PropertyId>,
    Json(update): Json<PropertyUpdate>,
) -> Result<Json<Property>> {
    Ok(Json(
        PropertyManager::new(&state.pool)
            .update(id, &user, update)
            .await?,
    ))
}

#[tracing::instrument(skip(state, user))]
pub async fn delete(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<PropertyId>,
) -> Result<StatusCode> {
    let images = PropertyManager::new(&state.pool).delete(id, &user).await?;
    for image in images {
        uploads::remove_image(&state.config.upload_dir, &image.path).await;
    }
    Ok(StatusCode::NO_CONTENT)
}

#[tracing::instrument(skip(state, user, req))]
pub async fn set_status(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<PropertyId>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<Property>> {
    let (property, changed) = PropertyManager::new(&state.pool)
        .set_status(id, &user, req.status)
        .await?;
    if changed {
        announce_status(&state, &property);
    }
    Ok(Json(property))
}

#[tracing::instrument(skip(state, user, multipart))]
pub async fn upload_images(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<PropertyId>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Vec<PropertyImage>>)> {
    let manager = PropertyManager::new(&state.pool);
    // Check ownership before touching the disk.
    let property = manager.get(id).await?;
    if !property.is_managed_by(&user) {
        return Err(Error::forbidden("Only the owner or an admin can manage this listing"));
    }

    let mut stored = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::bad_request(e.to_string()))?
    {
        if field.name() != Some("image") {
            continue;
        }
        let path = uploads::store_image(&state.config.upload_dir, field).await?;
        stored.push(manager.add_image(id, &user, &path).await?);
    }

    if stored.is_empty() {
        return Err(Error::bad_request("No image field in upload"));
    }
    Ok((StatusCode::CREATED, Json(stored)))
}

#[tracing::instrument(skip(state, user))]
pub async fn delete_image(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path((id, image_id)): Path<(PropertyId, i64)>,
) -> Result<StatusCode> {
    let image = PropertyManager::new(&state.pool)
        .remove_image(id, &user, image_id)
        .await?;
    uploads::remove_image(&state.config.upload_dir, &image.path).await;
    Ok(StatusCode::NO_CONTENT)
}
