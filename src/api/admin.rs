use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use super::properties::announce_status;
use crate::auth::AdminUser;
use crate::errors::{Error, Result};
use crate::manager::{
    property_manager::{AdminPropertyFilter, PropertyManager},
    user_manager::{UserFilter, UserManager, UserSort},
    Page, Pagination, Property, PropertyId, Role, SortOrder, User, UserId,
};
use crate::utils::{empty_as_none, empty_enum_as_none};
use crate::AppState;

#[derive(Deserialize)]
pub struct RejectRequest {
    reason: String,
}

#[derive(Deserialize)]
pub struct RoleRequest {
    role: Role,
}

#[derive(Deserialize, Default)]
pub struct UserQuery {
    #[serde(default, deserialize_with = "empty_enum_as_none")]
    role: Option<Role>,
    #[serde(default, deserialize_with = "empty_as_none")]
    search: Option<String>,
    #[serde(default, deserialize_with = "empty_enum_as_none")]
    sort: Option<UserSort>,
    #[serde(default, deserialize_with = "empty_enum_as_none")]
    order: Option<SortOrder>,
    #[serde(default, deserialize_with = "empty_as_none")]
    skip: Option<i64>,
    #[serde(default, deserialize_with = "empty_as_none")]
    limit: Option<i64>,
}

impl From<UserQuery> for UserFilter {
    fn from(q: UserQuery) -> Self {
        UserFilter {
            role: q.role,
            search: q.search,
            sort: q.sort.unwrap_or_default(),
            order: q.order.unwrap_or_default(),
            page: Pagination {
                skip: q.skip,
                limit: q.limit,
            },
        }
    }
}

#[tracing::instrument(skip_all)]
pub async fn list_properties(
    State(state): State<Arc<AppState>>,
    _: AdminUser,
    Query(filter): Query<AdminPropertyFilter>,
) -> Result<Json<Page<Property>>> {
    Ok(Json(
        PropertyManager::new(&state.pool).admin_list(&filter).await?,
    ))
}

#[tracing::instrument(skip(state, admin))]
pub async fn approve(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<PropertyId>,
) -> Result<Json<Property>> {
    let property = PropertyManager::new(&state.pool).approve(id).await?;
    tracing::info!(admin_id = admin.id, property_id = id, "listing approved");
    announce_status(&state, &property);
    Ok(Json(property))
}

#[tracing::instrument(skip(state, admin, req))]
pub async fn reject(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<PropertyId>,
    Json(req): Json<RejectRequest>,
) -> Result<Json<Property>> {
    let property = PropertyManager::new(&state.pool)
        .reject(id, &req.reason)
        .await?;
    tracing::info!(admin_id = admin.id, property_id = id, "listing rejected");
    announce_status(&state, &property);
    Ok(Json(property))
}

#[tracing::instrument(skip_all)]
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    _: AdminUser,
    Query(query): Query<UserQuery>,
) -> Result<Json<Page<User>>> {
    let filter = UserFilter::from(query);
    Ok(Json(UserManager::new(&state.pool).list(&filter).await?))
}

#[tracing::instrument(skip(state, admin, req))]
pub async fn set_role(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<UserId>,
    Json(req): Json<RoleRequest>,
) -> Result<Json<User>> {
    if id == admin.id {
        return Err(Error::bad_request("Admins cannot change their own role"));
    }
    let user = UserManager::new(&state.pool).set_role(id, req.role).await?;
    tracing::info!(admin_id = admin.id, user_id = id, role = ?req.role, "role changed");
    Ok(Json(user))
}
