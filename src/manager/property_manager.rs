use chrono::Utc;
use serde::Deserialize;
use sqlx::{QueryBuilder, Sqlite};

use super::{
    ApprovalStatus, DbError, FieldError, ListingStatus, ListingType, Page, Pagination, Property,
    PropertyId, PropertyImage, PropertyType, SortOrder, User, Validation,
};
use crate::utils::{empty_as_none, empty_enum_as_none};

pub const TITLE_LEN: std::ops::RangeInclusive<usize> = 5..=200;
pub const MIN_DESCRIPTION_LEN: usize = 20;

/// Fields of a listing as submitted by its owner.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct NewProperty {
    pub title: String,
    pub description: String,
    pub property_type: PropertyType,
    pub listing_type: ListingType,
    pub price: i64,
    pub address: String,
    pub city: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(default)]
    pub bedrooms: i64,
    #[serde(default)]
    pub bathrooms: i64,
    pub area_sqm: Option<f64>,
}

impl NewProperty {
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut v = Validation::default();
        let title_len = self.title.trim().chars().count();
        v.check(
            TITLE_LEN.contains(&title_len),
            "title",
            format!(
                "Title must be between {} and {} characters",
                TITLE_LEN.start(),
                TITLE_LEN.end()
            ),
        );
        v.check(
            self.description.trim().chars().count() >= MIN_DESCRIPTION_LEN,
            "description",
            format!("Description must be at least {MIN_DESCRIPTION_LEN} characters"),
        );
        v.check(self.price > 0, "price", "Price must be greater than zero");
        v.check(!self.address.trim().is_empty(), "address", "Address is required");
        v.check(!self.city.trim().is_empty(), "city", "City is required");
        v.check(self.bedrooms >= 0, "bedrooms", "Bedrooms cannot be negative");
        v.check(self.bathrooms >= 0, "bathrooms", "Bathrooms cannot be negative");
        v.check(
            self.latitude.map_or(true, |lat| (-90.0..=90.0).contains(&lat)),
            "latitude",
            "Latitude must be between -90 and 90",
        );
        v.check(
            self.longitude.map_or(true, |lng| (-180.0..=180.0).contains(&lng)),
            "longitude",
            "Longitude must be between -180 and 180",
        );
        v.check(
            self.area_sqm.map_or(true, |a| a > 0.0),
            "area_sqm",
            "Area must be greater than zero",
        );
        v.finish()
    }
}

impl From<&Property> for NewProperty {
    fn from(p: &Property) -> Self {
        Self {
            title: p.title.clone(),
            description: p.description.clone(),
            property_type: p.property_type,
            listing_type: p.listing_type,
            price: p.price,
            address: p.address.clone(),
            city: p.city.clone(),
            latitude: p.latitude,
            longitude: p.longitude,
            bedrooms: p.bedrooms,
            bathrooms: p.bathrooms,
            area_sqm: p.area_sqm,
        }
    }
}

/// Partial edit of a listing. Absent fields keep their current value.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct PropertyUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub property_type: Option<PropertyType>,
    pub listing_type: Option<ListingType>,
    pub price: Option<i64>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub bedrooms: Option<i64>,
    pub bathrooms: Option<i64>,
    pub area_sqm: Option<f64>,
}

impl PropertyUpdate {
    fn apply(self, draft: &mut NewProperty) {
        macro_rules! merge {
            ($($field:ident),*) => {
                $(if let Some(value) = self.$field { draft.$field = value; })*
            };
        }
        merge!(title, description, property_type, listing_type, price, address, city, bedrooms, bathrooms);
        if self.latitude.is_some() {
            draft.latitude = self.latitude;
        }
        if self.longitude.is_some() {
            draft.longitude = self.longitude;
        }
        if self.area_sqm.is_some() {
            draft.area_sqm = self.area_sqm;
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PropertySort {
    #[default]
    Newest,
    Oldest,
    PriceAsc,
    PriceDesc,
}

impl PropertySort {
    fn order_by(self) -> &'static str {
        match self {
            PropertySort::Newest => " ORDER BY id DESC",
            PropertySort::Oldest => " ORDER BY id ASC",
            PropertySort::PriceAsc => " ORDER BY price ASC, id DESC",
            PropertySort::PriceDesc => " ORDER BY price DESC, id DESC",
        }
    }
}

/// Public browse filter. Every field may arrive as an empty form value.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct PropertyFilter {
    #[serde(default, deserialize_with = "empty_as_none")]
    pub city: Option<String>,
    #[serde(default, deserialize_with = "empty_enum_as_none")]
    pub property_type: Option<PropertyType>,
    #[serde(default, deserialize_with = "empty_enum_as_none")]
    pub listing_type: Option<ListingType>,
    #[serde(default, deserialize_with = "empty_enum_as_none")]
    pub status: Option<ListingStatus>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub min_price: Option<i64>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub max_price: Option<i64>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub min_bedrooms: Option<i64>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub q: Option<String>,
    #[serde(default, deserialize_with = "empty_enum_as_none")]
    pub sort: Option<PropertySort>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub skip: Option<i64>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub limit: Option<i64>,
}

impl PropertyFilter {
    pub fn page(&self) -> Pagination {
        Pagination {
            skip: self.skip,
            limit: self.limit,
        }
    }

    fn push_where<'q>(&'q self, builder: &mut QueryBuilder<'q, Sqlite>) {
        builder
            .push(" WHERE approval_status = ")
            .push_bind(ApprovalStatus::Approved)
            .push(" AND status = ")
            .push_bind(self.status.unwrap_or(ListingStatus::Available));
        if let Some(city) = &self.city {
            builder
                .push(" AND city = ")
                .push_bind(city.trim())
                .push(" COLLATE NOCASE");
        }
        if let Some(property_type) = self.property_type {
            builder.push(" AND property_type = ").push_bind(property_type);
        }
        if let Some(listing_type) = self.listing_type {
            builder.push(" AND listing_type = ").push_bind(listing_type);
        }
        if let Some(min) = self.min_price {
            builder.push(" AND price >= ").push_bind(min);
        }
        if let Some(max) = self.max_price {
            builder.push(" AND price <= ").push_bind(max);
        }
        if let Some(beds) = self.min_bedrooms {
            builder.push(" AND bedrooms >= ").push_bind(beds);
        }
        if let Some(q) = &self.q {
            let pattern = format!("%{}%", q.trim());
            builder
                .push(" AND (title LIKE ")
                .push_bind(pattern.clone())
                .push(" OR description LIKE ")
                .push_bind(pattern)
                .push(")");
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AdminPropertySort {
    #[default]
    CreatedAt,
    Price,
    Title,
}

impl AdminPropertySort {
    fn column(self) -> &'static str {
        match self {
            AdminPropertySort::CreatedAt => "id",
            AdminPropertySort::Price => "price",
            AdminPropertySort::Title => "title",
        }
    }
}

/// Admin review table filter.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct AdminPropertyFilter {
    #[serde(default, deserialize_with = "empty_enum_as_none")]
    pub approval_status: Option<ApprovalStatus>,
    #[serde(default, deserialize_with = "empty_enum_as_none")]
    pub sort: Option<AdminPropertySort>,
    #[serde(default, deserialize_with = "empty_enum_as_none")]
    pub order: Option<SortOrder>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub skip: Option<i64>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub limit: Option<i64>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("listing must be approved before its status can change (currently {0})")]
    NotApproved(ApprovalStatus),
    #[error("cannot change status from {from} to {to}")]
    Status {
        from: ListingStatus,
        to: ListingStatus,
    },
    #[error("cannot mark a listing {to} while it is {from}")]
    Approval {
        from: ApprovalStatus,
        to: ApprovalStatus,
    },
}

/// Checks a market status change. Returns `false` when the status is unchanged.
pub fn check_status_transition(
    approval: ApprovalStatus,
    from: ListingStatus,
    to: ListingStatus,
) -> Result<bool, TransitionError> {
    use ListingStatus::*;

    if approval != ApprovalStatus::Approved {
        return Err(TransitionError::NotApproved(approval));
    }
    match (from, to) {
        (a, b) if a == b => Ok(false),
        (Available, Sold | Rented | Cancelled) => Ok(true),
        (Rented | Cancelled, Available) => Ok(true),
        _ => Err(TransitionError::Status { from, to }),
    }
}

/// Checks an admin review decision.
pub fn check_approval_transition(
    from: ApprovalStatus,
    to: ApprovalStatus,
) -> Result<(), TransitionError> {
    use ApprovalStatus::*;

    match (from, to) {
        (Pending | Rejected, Approved) | (Pending | Approved, Rejected) => Ok(()),
        _ => Err(TransitionError::Approval { from, to }),
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("property {0} not found")]
    NotFound(PropertyId),
    #[error("not allowed to manage this listing")]
    Forbidden,
    #[error("invalid listing")]
    Invalid(Vec<FieldError>),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    DatabaseError(DbError),
}

impl From<sqlx::Error> for Error {
    fn from(value: sqlx::Error) -> Self {
        Error::DatabaseError(value.into())
    }
}

pub struct PropertyManager<'a> {
    pool: &'a sqlx::SqlitePool,
}

impl<'a> PropertyManager<'a> {
    pub fn new(pool: &'a sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

impl PropertyManager<'_> {
    pub async fn create(&self, owner: &User, new: NewProperty) -> Result<Property, Error> {
        new.validate().map_err(Error::Invalid)?;
        let now = Utc::now();
        let property = sqlx::query_as::<_, Property>(
            "INSERT INTO properties(owner_id, title, description, property_type, listing_type, price, \
             address, city, latitude, longitude, bedrooms, bathrooms, area_sqm, approval_status, \
             status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(owner.id)
        .bind(new.title.trim())
        .bind(new.description.trim())
        .bind(new.property_type)
        .bind(new.listing_type)
        .bind(new.price)
        .bind(new.address.trim())
        .bind(new.city.trim())
        .bind(new.latitude)
        .bind(new.longitude)
        .bind(new.bedrooms)
        .bind(new.bathrooms)
        .bind(new.area_sqm)
        .bind(ApprovalStatus::Pending)
        .bind(ListingStatus::Available)
        .bind(now)
        .bind(now)
        .fetch_one(self.pool)
        .await?;

        tracing::info!(property_id = property.id, owner_id = owner.id, "listing submitted");
        Ok(property)
    }

    pub async fn get(&self, id: PropertyId) -> Result<Property, Error> {
        sqlx::query_as::<_, Property>("SELECT * FROM properties WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await?
            .ok_or(Error::NotFound(id))
    }

    /// A listing under review is only visible to its owner and to admins.
    pub async fn get_visible(&self, id: PropertyId, viewer: Option<&User>) -> Result<Property, Error> {
        let property = self.get(id).await?;
        let visible = property.approval_status == ApprovalStatus::Approved
            || viewer.is_some_and(|v| property.is_managed_by(v));
        if visible {
            Ok(property)
        } else {
            Err(Error::NotFound(id))
        }
    }

    async fn get_managed(&self, id: PropertyId, editor: &User) -> Result<Property, Error> {
        let property = self.get(id).await?;
        if property.is_managed_by(editor) {
            Ok(property)
        } else {
            Err(Error::Forbidden)
        }
    }

    pub async fn update(
        &self,
        id: PropertyId,
        editor: &User,
        update: PropertyUpdate,
    ) -> Result<Property, Error> {
        let current = self.get_managed(id, editor).await?;
        let mut draft = NewProperty::from(&current);
        update.apply(&mut draft);
        draft.validate().map_err(Error::Invalid)?;

        // An owner edit sends the listing back to review.
        let (approval, reason) = if editor.is_admin() {
            (current.approval_status, current.rejection_reason)
        } else {
            (ApprovalStatus::Pending, None)
        };

        let property = sqlx::query_as::<_, Property>(
            "UPDATE properties SET title = ?, description = ?, property_type = ?, listing_type = ?, \
             price = ?, address = ?, city = ?, latitude = ?, longitude = ?, bedrooms = ?, \
             bathrooms = ?, area_sqm = ?, approval_status = ?, rejection_reason = ?, updated_at = ? \
             WHERE id = ? RETURNING *",
        )
        .bind(draft.title.trim())
        .bind(draft.description.trim())
        .bind(draft.property_type)
        .bind(draft.listing_type)
        .bind(draft.price)
        .bind(draft.address.trim())
        .bind(draft.city.trim())
        .bind(draft.latitude)
        .bind(draft.longitude)
        .bind(draft.bedrooms)
        .bind(draft.bathrooms)
        .bind(draft.area_sqm)
        .bind(approval)
        .bind(reason)
        .bind(Utc::now())
        .bind(id)
        .fetch_one(self.pool)
        .await?;
        Ok(property)
    }

    pub async fn delete(&self, id: PropertyId, editor: &User) -> Result<Vec<PropertyImage>, Error> {
        self.get_managed(id, editor).await?;
        let images = self.images(id).await?;
        sqlx::query("DELETE FROM properties WHERE id = ?")
            .bind(id)
            .execute(self.pool)
            .await?;
        tracing::info!(property_id = id, editor_id = editor.id, "listing deleted");
        Ok(images)
    }

    pub async fn search(&self, filter: &PropertyFilter) -> Result<Page<Property>, Error> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM properties");
        filter.push_where(&mut count);
        let total_count = count
            .build_query_scalar::<i64>()
            .fetch_one(self.pool)
            .await?;

        let page = filter.page();
        let (skip, limit) = (page.skip(), page.limit());
        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM properties");
        filter.push_where(&mut query);
        query
            .push(filter.sort.unwrap_or_default().order_by())
            .push(" LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(skip);
        let data = query
            .build_query_as::<Property>()
            .fetch_all(self.pool)
            .await?;

        Ok(Page {
            data,
            total_count,
            skip,
            limit,
        })
    }

    pub async fn list_for_owner(&self, owner: &User) -> Result<Vec<Property>, Error> {
        Ok(sqlx::query_as::<_, Property>(
            "SELECT * FROM properties WHERE owner_id = ? ORDER BY id DESC",
        )
        .bind(owner.id)
        .fetch_all(self.pool)
        .await?)
    }

    pub async fn admin_list(&self, filter: &AdminPropertyFilter) -> Result<Page<Property>, Error> {
        let push_where = |builder: &mut QueryBuilder<'_, Sqlite>| {
            if let Some(approval) = filter.approval_status {
                builder.push(" WHERE approval_status = ").push_bind(approval);
            }
        };

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM properties");
        push_where(&mut count);
        let total_count = count
            .build_query_scalar::<i64>()
            .fetch_one(self.pool)
            .await?;

        let page = Pagination {
            skip: filter.skip,
            limit: filter.limit,
        };
        let (skip, limit) = (page.skip(), page.limit());
        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM properties");
        push_where(&mut query);
        query
            .push(format!(
                " ORDER BY {} {}, id DESC",
                filter.sort.unwrap_or_default().column(),
                filter.order.unwrap_or_default().sql()
            ))
            .push(" LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(skip);
        let data = query
            .build_query_as::<Property>()
            .fetch_all(self.pool)
            .await?;

        Ok(Page {
            data,
            total_count,
            skip,
            limit,
        })
    }

    pub async fn approve(&self, id: PropertyId) -> Result<Property, Error> {
        let current = self.get(id).await?;
        check_approval_transition(current.approval_status, ApprovalStatus::Approved)?;
        self.set_approval(id, ApprovalStatus::Approved, None).await
    }

    pub async fn reject(&self, id: PropertyId, reason: &str) -> Result<Property, Error> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(Error::Invalid(vec![FieldError {
                field: "reason",
                message: "A rejection reason is required".to_owned(),
            }]));
        }
        let current = self.get(id).await?;
        check_approval_transition(current.approval_status, ApprovalStatus::Rejected)?;
        self.set_approval(id, ApprovalStatus::Rejected, Some(reason)).await
    }

    async fn set_approval(
        &self,
        id: PropertyId,
        approval: ApprovalStatus,
        reason: Option<&str>,
    ) -> Result<Property, Error> {
        let property = sqlx::query_as::<_, Property>(
            "UPDATE properties SET approval_status = ?, rejection_reason = ?, updated_at = ? \
             WHERE id = ? RETURNING *",
        )
        .bind(approval)
        .bind(reason)
        .bind(Utc::now())
        .bind(id)
        .fetch_one(self.pool)
        .await?;
        tracing::info!(property_id = id, %approval, "listing reviewed");
        Ok(property)
    }

    /// Returns the listing and whether its status actually changed.
    pub async fn set_status(
        &self,
        id: PropertyId,
        editor: &User,
        status: ListingStatus,
    ) -> Result<(Property, bool), Error> {
        let current = self.get_managed(id, editor).await?;
        if !check_status_transition(current.approval_status, current.status, status)? {
            return Ok((current, false));
        }
        let property = sqlx::query_as::<_, Property>(
            "UPDATE properties SET status = ?, updated_at = ? WHERE id = ? RETURNING *",
        )
        .bind(status)
        .bind(Utc::now())
        .bind(id)
        .fetch_one(self.pool)
        .await?;
        tracing::info!(property_id = id, from = %current.status, to = %status, "listing status changed");
        Ok((property, true))
    }

    pub async fn images(&self, id: PropertyId) -> Result<Vec<PropertyImage>, Error> {
        Ok(sqlx::query_as::<_, PropertyImage>(
            "SELECT * FROM property_images WHERE property_id = ? ORDER BY position, id",
        )
        .bind(id)
        .fetch_all(self.pool)
        .await?)
    }

    pub async fn add_image(
        &self,
        id: PropertyId,
        editor: &User,
        path: &str,
    ) -> Result<PropertyImage, Error> {
        self.get_managed(id, editor).await?;
        Ok(sqlx::query_as::<_, PropertyImage>(
            "INSERT INTO property_images(property_id, path, position) \
             VALUES (?, ?, (SELECT COALESCE(MAX(position) + 1, 0) FROM property_images WHERE property_id = ?)) \
             RETURNING *",
        )
        .bind(id)
        .bind(path)
        .bind(id)
        .fetch_one(self.pool)
        .await?)
    }

    pub async fn remove_image(
        &self,
        id: PropertyId,
        editor: &User,
        image_id: i64,
    ) -> Result<PropertyImage, Error> {
        self.get_managed(id, editor).await?;
        sqlx::query_as::<_, PropertyImage>(
            "DELETE FROM property_images WHERE id = ? AND property_id = ? RETURNING *",
        )
        .bind(image_id)
        .bind(id)
        .fetch_optional(self.pool)
        .await?
        .ok_or(Error::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::user_manager::UserManager;

    fn draft() -> NewProperty {
        NewProperty {
            title: "Bright two bedroom flat".into(),
            description: "Second floor flat with balcony and new kitchen.".into(),
            property_type: PropertyType::Apartment,
            listing_type: ListingType::Rent,
            price: 1200,
            address: "7 Canal Street".into(),
            city: "Springfield".into(),
            latitude: Some(39.8),
            longitude: Some(-89.6),
            bedrooms: 2,
            bathrooms: 1,
            area_sqm: Some(64.0),
        }
    }

    async fn user(pool: &sqlx::SqlitePool, id: i64) -> User {
        UserManager::new(pool).get(id).await.unwrap()
    }

    #[test]
    fn status_transition_table() {
        use ListingStatus::*;
        let approved = ApprovalStatus::Approved;
        assert_eq!(check_status_transition(approved, Available, Sold), Ok(true));
        assert_eq!(check_status_transition(approved, Available, Rented), Ok(true));
        assert_eq!(check_status_transition(approved, Available, Cancelled), Ok(true));
        assert_eq!(check_status_transition(approved, Rented, Available), Ok(true));
        assert_eq!(check_status_transition(approved, Cancelled, Available), Ok(true));
        assert_eq!(check_status_transition(approved, Sold, Sold), Ok(false));
        assert_eq!(
            check_status_transition(approved, Sold, Available),
            Err(TransitionError::Status {
                from: Sold,
                to: Available
            })
        );
        assert_eq!(
            check_status_transition(approved, Rented, Sold),
            Err(TransitionError::Status {
                from: Rented,
                to: Sold
            })
        );
        assert_eq!(
            check_status_transition(ApprovalStatus::Pending, Available, Sold),
            Err(TransitionError::NotApproved(ApprovalStatus::Pending))
        );
    }

    #[test]
    fn approval_transition_table() {
        use ApprovalStatus::*;
        assert!(check_approval_transition(Pending, Approved).is_ok());
        assert!(check_approval_transition(Rejected, Approved).is_ok());
        assert!(check_approval_transition(Pending, Rejected).is_ok());
        assert!(check_approval_transition(Approved, Rejected).is_ok());
        assert!(check_approval_transition(Approved, Approved).is_err());
        assert!(check_approval_transition(Rejected, Rejected).is_err());
        assert!(check_approval_transition(Approved, Pending).is_err());
    }

    #[test]
    fn validation_reports_every_field() {
        let bad = NewProperty {
            title: "abc".into(),
            description: "short".into(),
            price: 0,
            city: " ".into(),
            latitude: Some(120.0),
            ..draft()
        };
        let fields: Vec<_> = bad.validate().unwrap_err().into_iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["title", "description", "price", "city", "latitude"]);
        assert!(draft().validate().is_ok());
    }

    #[sqlx::test(fixtures("users"))]
    async fn create_starts_pending_and_available(pool: sqlx::SqlitePool) {
        let owner = user(&pool, 1).await;
        let property = PropertyManager::new(&pool).create(&owner, draft()).await.unwrap();
        assert_eq!(property.owner_id, 1);
        assert_eq!(property.approval_status, ApprovalStatus::Pending);
        assert_eq!(property.status, ListingStatus::Available);
    }

    #[sqlx::test(fixtures("users", "properties"))]
    async fn search_only_shows_approved_available(pool: sqlx::SqlitePool) {
        let page = PropertyManager::new(&pool)
            .search(&PropertyFilter::default())
            .await
            .unwrap();
        let ids: Vec<_> = page.data.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![2, 1]);
        assert_eq!(page.total_count, 2);
    }

    #[sqlx::test(fixtures("users", "properties"))]
    async fn search_applies_filters_and_sort(pool: sqlx::SqlitePool) {
        let manager = PropertyManager::new(&pool);
        let filter = PropertyFilter {
            city: Some("springfield".into()),
            listing_type: Some(ListingType::Sale),
            min_bedrooms: Some(3),
            ..Default::default()
        };
        let page = manager.search(&filter).await.unwrap();
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.data[0].id, 1);

        let sold = PropertyFilter {
            status: Some(ListingStatus::Sold),
            ..Default::default()
        };
        assert_eq!(manager.search(&sold).await.unwrap().data[0].id, 5);

        let by_price = PropertyFilter {
            sort: Some(PropertySort::PriceAsc),
            max_price: Some(500_000),
            q: Some("loft".into()),
            ..Default::default()
        };
        let page = manager.search(&by_price).await.unwrap();
        assert_eq!(page.data.iter().map(|p| p.id).collect::<Vec<_>>(), vec![2]);
    }

    #[sqlx::test(fixtures("users", "properties"))]
    async fn pending_listing_hidden_from_strangers(pool: sqlx::SqlitePool) {
        let manager = PropertyManager::new(&pool);
        let owner = user(&pool, 1).await;
        let admin = user(&pool, 3).await;
        let stranger = user(&pool, 2).await;
        assert!(manager.get_visible(3, Some(&owner)).await.is_ok());
        assert!(manager.get_visible(3, Some(&admin)).await.is_ok());
        assert!(matches!(
            manager.get_visible(3, Some(&stranger)).await,
            Err(Error::NotFound(3))
        ));
        assert!(matches!(manager.get_visible(3, None).await, Err(Error::NotFound(3))));
        assert!(manager.get_visible(1, None).await.is_ok());
    }

    #[sqlx::test(fixtures("users", "properties"))]
    async fn owner_edit_resubmits_for_review(pool: sqlx::SqlitePool) {
        let manager = PropertyManager::new(&pool);
        let owner = user(&pool, 4).await;
        let updated = manager
            .update(
                4,
                &owner,
                PropertyUpdate {
                    price: Some(3000),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.price, 3000);
        assert_eq!(updated.approval_status, ApprovalStatus::Pending);
        assert_eq!(updated.rejection_reason, None);
    }

    #[sqlx::test(fixtures("users", "properties"))]
    async fn admin_edit_keeps_review_state(pool: sqlx::SqlitePool) {
        let manager = PropertyManager::new(&pool);
        let admin = user(&pool, 3).await;
        let updated = manager
            .update(
                1,
                &admin,
                PropertyUpdate {
                    title: Some("Sunny family house with pool".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.approval_status, ApprovalStatus::Approved);
    }

    #[sqlx::test(fixtures("users", "properties"))]
    async fn strangers_cannot_edit_or_delete(pool: sqlx::SqlitePool) {
        let manager = PropertyManager::new(&pool);
        let stranger = user(&pool, 2).await;
        assert!(matches!(
            manager.update(1, &stranger, PropertyUpdate::default()).await,
            Err(Error::Forbidden)
        ));
        assert!(matches!(manager.delete(1, &stranger).await, Err(Error::Forbidden)));
        assert!(matches!(
            manager.set_status(1, &stranger, ListingStatus::Sold).await,
            Err(Error::Forbidden)
        ));
    }

    #[sqlx::test(fixtures("users", "properties"))]
    async fn invalid_update_is_rejected(pool: sqlx::SqlitePool) {
        let owner = user(&pool, 1).await;
        let result = PropertyManager::new(&pool)
            .update(
                1,
                &owner,
                PropertyUpdate {
                    price: Some(-5),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(Error::Invalid(errors)) if errors[0].field == "price"));
    }

    #[sqlx::test(fixtures("users", "properties"))]
    async fn approve_and_reject(pool: sqlx::SqlitePool) {
        let manager = PropertyManager::new(&pool);
        let approved = manager.approve(3).await.unwrap();
        assert_eq!(approved.approval_status, ApprovalStatus::Approved);

        let approved = manager.approve(4).await.unwrap();
        assert_eq!(approved.rejection_reason, None);

        assert!(matches!(
            manager.approve(1).await,
            Err(Error::Transition(TransitionError::Approval { .. }))
        ));
        assert!(matches!(manager.reject(1, "  ").await, Err(Error::Invalid(_))));

        let rejected = manager.reject(1, "Misleading photos").await.unwrap();
        assert_eq!(rejected.approval_status, ApprovalStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("Misleading photos"));
        assert!(matches!(manager.approve(99).await, Err(Error::NotFound(99))));
    }

    #[sqlx::test(fixtures("users", "properties"))]
    async fn set_status_follows_transitions(pool: sqlx::SqlitePool) {
        let manager = PropertyManager::new(&pool);
        let owner = user(&pool, 1).await;
        let (property, changed) = manager.set_status(2, &owner, ListingStatus::Rented).await.unwrap();
        assert!(changed);
        assert_eq!(property.status, ListingStatus::Rented);

        let (_, changed) = manager.set_status(2, &owner, ListingStatus::Rented).await.unwrap();
        assert!(!changed);

        assert!(matches!(
            manager.set_status(2, &owner, ListingStatus::Sold).await,
            Err(Error::Transition(TransitionError::Status { .. }))
        ));
        assert!(matches!(
            manager.set_status(3, &owner, ListingStatus::Sold).await,
            Err(Error::Transition(TransitionError::NotApproved(ApprovalStatus::Pending)))
        ));
    }

    #[sqlx::test(fixtures("users", "properties"))]
    async fn images_are_ordered_and_removed(pool: sqlx::SqlitePool) {
        let manager = PropertyManager::new(&pool);
        let owner = user(&pool, 1).await;
        let first = manager.add_image(1, &owner, "a.jpg").await.unwrap();
        let second = manager.add_image(1, &owner, "b.jpg").await.unwrap();
        assert_eq!((first.position, second.position), (0, 1));

        let removed = manager.remove_image(1, &owner, first.id).await.unwrap();
        assert_eq!(removed.path, "a.jpg");
        let remaining = manager.images(1).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].path, "b.jpg");

        let images = manager.delete(1, &owner).await.unwrap();
        assert_eq!(images.len(), 1);
        assert!(matches!(manager.get(1).await, Err(Error::NotFound(1))));
    }
}
