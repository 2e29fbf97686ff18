use std::sync::Arc;

use askama::Template;
use axum::extract::{Path, Query, State};

use crate::auth::MaybeUser;
use crate::errors::Result;
use crate::manager::{
    property_manager::{PropertyFilter, PropertyManager},
    ApprovalStatus, ListingType, Property, PropertyId, PropertyImage, User,
};
use crate::AppState;

/// Whole currency units with thousands separators, e.g. `450,000`.
pub(crate) fn format_price(price: i64) -> String {
    let digits = price.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if price < 0 {
        out.insert(0, '-');
    }
    out
}

fn price_label(property: &Property) -> String {
    match property.listing_type {
        ListingType::Sale => format_price(property.price),
        ListingType::Rent => format!("{} / month", format_price(property.price)),
    }
}

pub struct ListingCard {
    id: PropertyId,
    title: String,
    city: String,
    price: String,
    bedrooms: i64,
    bathrooms: i64,
    cover: Option<String>,
}

#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    user: Option<User>,
    city: String,
    q: String,
    cards: Vec<ListingCard>,
    total_count: i64,
    prev_skip: Option<i64>,
    next_skip: Option<i64>,
}

#[tracing::instrument(skip_all)]
pub async fn index(
    State(state): State<Arc<AppState>>,
    MaybeUser(user): MaybeUser,
    Query(filter): Query<PropertyFilter>,
) -> Result<IndexTemplate> {
    let manager = PropertyManager::new(&state.pool);
    let page = manager.search(&filter).await?;

    let mut cards = Vec::with_capacity(page.data.len());
    for property in &page.data {
        let cover = manager
            .images(property.id)
            .await?
            .into_iter()
            .next()
            .map(|image| image.path);
        cards.push(ListingCard {
            id: property.id,
            title: property.title.clone(),
            city: property.city.clone(),
            price: price_label(property),
            bedrooms: property.bedrooms,
            bathrooms: property.bathrooms,
            cover,
        });
    }

    let prev_skip = (page.skip > 0).then(|| page.skip.saturating_sub(page.limit).max(0));
    let next_skip = page
        .skip
        .checked_add(page.limit)
        .filter(|next| *next < page.total_count);

    Ok(IndexTemplate {
        user,
        city: filter.city.unwrap_or_default(),
        q: filter.q.unwrap_or_default(),
        cards,
        total_count: page.total_count,
        prev_skip,
        next_skip,
    })
}

#[derive(Template)]
#[template(path = "property.html")]
pub struct PropertyTemplate {
    user: Option<User>,
    property: Property,
    images: Vec<PropertyImage>,
    price: String,
    pending_review: bool,
    can_contact: bool,
}

#[tracing::instrument(skip(state, user))]
pub async fn detail(
    State(state): State<Arc<AppState>>,
    MaybeUser(user): MaybeUser,
    Path(id): Path<PropertyId>,
) -> Result<PropertyTemplate> {
    let manager = PropertyManager::new(&state.pool);
    let property = manager.get_visible(id, user.as_ref()).await?;
    let images = manager.images(id).await?;

    let can_contact = user.as_ref().map_or(false, |u| u.id != property.owner_id)
        && property.approval_status == ApprovalStatus::Approved;

    Ok(PropertyTemplate {
        price: price_label(&property),
        pending_review: property.approval_status != ApprovalStatus::Approved,
        can_contact,
        user,
        property,
        images,
    })
}

#[cfg(test)]
mod tests {
    use super::format_price;

    #[test]
    fn prices_get_thousands_separators() {
        assert_eq!(format_price(0), "0");
        assert_eq!(format_price(950), "950");
        assert_eq!(format_price(1800), "1,800");
        assert_eq!(format_price(450000), "450,000");
        assert_eq!(format_price(12345678), "12,345,678");
    }
}
