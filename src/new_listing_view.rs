use std::{str::FromStr, sync::Arc};

use askama::Template;
use axum::{
    extract::{Multipart, State},
    http::{HeaderMap, HeaderValue},
    response::{IntoResponse, Redirect, Response},
};
use serde::de::{value::StrDeserializer, IntoDeserializer};
use serde::Deserialize;

use crate::auth::MaybeUser;
use crate::errors::{Error, Result};
use crate::manager::{
    property_manager::{self, NewProperty, PropertyManager},
    FieldError, Property,
};
use crate::{uploads, AppState};

#[derive(Template)]
#[template(path = "new_listing_results.html")]
pub struct NewListingResultsTemplate {
    listing: Option<Property>,
    image_count: usize,
    errors: Vec<FieldError>,
}

/// Collects the text fields of the listing form as they stream in.
#[derive(Default)]
struct NewListingBuilder {
    title: String,
    description: String,
    property_type: String,
    listing_type: String,
    price: String,
    address: String,
    city: String,
    latitude: String,
    longitude: String,
    bedrooms: String,
    bathrooms: String,
    area_sqm: String,
    errors: Vec<FieldError>,
}

impl NewListingBuilder {
    fn new() -> Self {
        Self::default()
    }

    fn set_field(&mut self, name: &str, value: String) {
        let slot = match name {
            "title" => &mut self.title,
            "description" => &mut self.description,
            "property_type" => &mut self.property_type,
            "listing_type" => &mut self.listing_type,
            "price" => &mut self.price,
            "address" => &mut self.address,
            "city" => &mut self.city,
            "latitude" => &mut self.latitude,
            "longitude" => &mut self.longitude,
            "bedrooms" => &mut self.bedrooms,
            "bathrooms" => &mut self.bathrooms,
            "area_sqm" => &mut self.area_sqm,
            _ => return,
        };
        *slot = value;
    }

    fn error(&mut self, field: &'static str, message: &str) {
        self.errors.push(FieldError {
            field,
            message: message.to_owned(),
        });
    }

    fn choice<T: for<'de> Deserialize<'de>>(&mut self, field: &'static str) -> Option<T> {
        let raw = match field {
            "property_type" => self.property_type.trim(),
            _ => self.listing_type.trim(),
        };
        let value: StrDeserializer<'_, serde::de::value::Error> = raw.into_deserializer();
        match T::deserialize(value) {
            Ok(choice) => Some(choice),
            Err(_) => {
                self.error(field, "Pick one of the listed options");
                None
            }
        }
    }

    fn number<T: FromStr>(&mut self, field: &'static str, raw: &str) -> Option<T> {
        match raw.trim().parse() {
            Ok(n) => Some(n),
            Err(_) => {
                self.error(field, "Must be a number");
                None
            }
        }
    }

    fn optional_number(&mut self, field: &'static str, raw: &str) -> Option<f64> {
        if raw.trim().is_empty() {
            None
        } else {
            self.number(field, raw)
        }
    }

    fn count(&mut self, field: &'static str, raw: &str) -> i64 {
        if raw.trim().is_empty() {
            0
        } else {
            self.number(field, raw).unwrap_or(0)
        }
    }

    /// Parses every field and reports all problems at once, including the listing rules.
    fn build(mut self) -> std::result::Result<NewProperty, Vec<FieldError>> {
        let property_type = self.choice("property_type");
        let listing_type = self.choice("listing_type");
        let price = self.price.clone();
        let price = self.number("price", &price);
        let (latitude, longitude, area) = (
            self.latitude.clone(),
            self.longitude.clone(),
            self.area_sqm.clone(),
        );
        let latitude = self.optional_number("latitude", &latitude);
        let longitude = self.optional_number("longitude", &longitude);
        let area_sqm = self.optional_number("area_sqm", &area);
        let (bedrooms, bathrooms) = (self.bedrooms.clone(), self.bathrooms.clone());
        let bedrooms = self.count("bedrooms", &bedrooms);
        let bathrooms = self.count("bathrooms", &bathrooms);

        let (Some(property_type), Some(listing_type), Some(price)) =
            (property_type, listing_type, price)
        else {
            return Err(self.errors);
        };
        let new = NewProperty {
            title: self.title,
            description: self.description,
            property_type,
            listing_type,
            price,
            address: self.address,
            city: self.city,
            latitude,
            longitude,
            bedrooms,
            bathrooms,
            area_sqm,
        };

        let mut errors = self.errors;
        if let Err(rule_errors) = new.validate() {
            let fresh: Vec<_> = rule_errors
                .into_iter()
                .filter(|e| !errors.iter().any(|seen| seen.field == e.field))
                .collect();
            errors.extend(fresh);
        }
        if errors.is_empty() {
            Ok(new)
        } else {
            Err(errors)
        }
    }
}

#[tracing::instrument(skip_all)]
pub async fn try_new_listing(
    State(state): State<Arc<AppState>>,
    MaybeUser(user): MaybeUser,
    mut multipart: Multipart,
) -> Result<Response> {
    let Some(user) = user else {
        let mut headers = HeaderMap::new();
        headers.insert("HX-Redirect", HeaderValue::from_static("/login"));
        return Ok((headers, "").into_response());
    };

    let mut builder = NewListingBuilder::new();
    let mut image_paths = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::bad_request(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_owned();
        if name == "image" {
            // Browsers send an empty part when no file was picked.
            if field.file_name().map_or(true, str::is_empty) {
                continue;
            }
            match uploads::store_image(&state.config.upload_dir, field).await {
                Ok(path) => image_paths.push(path),
                Err(e) => builder.error("image", &e.user_message()),
            }
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| Error::bad_request(e.to_string()))?;
            builder.set_field(&name, value);
        }
    }

    let manager = PropertyManager::new(&state.pool);
    let created = match builder.build() {
        Ok(new) => manager.create(&user, new).await,
        Err(errors) => Err(property_manager::Error::Invalid(errors)),
    };
    let listing = match created {
        Ok(listing) => listing,
        Err(property_manager::Error::Invalid(errors)) => {
            for path in &image_paths {
                uploads::remove_image(&state.config.upload_dir, path).await;
            }
            return Ok(NewListingResultsTemplate {
                listing: None,
                image_count: 0,
                errors,
            }
            .into_response());
        }
        Err(e) => return Err(e.into()),
    };

    for path in &image_paths {
        manager.add_image(listing.id, &user, path).await?;
    }

    Ok(NewListingResultsTemplate {
        image_count: image_paths.len(),
        listing: Some(listing),
        errors: Vec::new(),
    }
    .into_response())
}

#[derive(Template)]
#[template(path = "new_listing.html")]
pub struct NewListingTemplate {}

pub async fn new_listing(MaybeUser(user): MaybeUser) -> Response {
    match user {
        Some(_) => NewListingTemplate {}.into_response(),
        None => Redirect::to("/login").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::{ListingType, PropertyType};

    fn filled() -> NewListingBuilder {
        let mut builder = NewListingBuilder::new();
        for (name, value) in [
            ("title", "Sunny corner house"),
            ("description", "Three bedrooms, a garden and a garage."),
            ("property_type", "house"),
            ("listing_type", "sale"),
            ("price", "325000"),
            ("address", "12 Elm Street"),
            ("city", "Springfield"),
            ("bedrooms", "3"),
            ("bathrooms", ""),
            ("latitude", ""),
        ] {
            builder.set_field(name, value.to_owned());
        }
        builder
    }

    #[test]
    fn builds_a_listing_from_form_fields() {
        let new = filled().build().unwrap();
        assert_eq!(new.property_type, PropertyType::House);
        assert_eq!(new.listing_type, ListingType::Sale);
        assert_eq!(new.price, 325000);
        assert_eq!(new.bedrooms, 3);
        assert_eq!(new.bathrooms, 0);
        assert_eq!(new.latitude, None);
    }

    #[test]
    fn reports_parse_and_rule_errors_together() {
        let mut builder = filled();
        builder.set_field("price", "a lot".to_owned());
        builder.set_field("property_type", "castle".to_owned());
        assert!(builder.build().is_err());

        let mut builder = filled();
        builder.set_field("title", "Hut".to_owned());
        builder.set_field("latitude", "north".to_owned());
        let errors = builder.build().unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["latitude", "title"]);
    }

    #[test]
    fn keeps_the_first_error_for_a_field() {
        let mut builder = filled();
        builder.set_field("title", "Hut".to_owned());
        builder.error("title", "Already taken");
        let errors = builder.build().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "title");
        assert_eq!(errors[0].message, "Already taken");
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let mut builder = filled();
        builder.set_field("owner_id", "99".to_owned());
        assert!(builder.build().is_ok());
    }
}
