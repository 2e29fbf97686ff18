use std::{fmt::Display, str::FromStr};

use serde::de::{self, IntoDeserializer};
use serde::{Deserialize, Deserializer};

/// Treats a missing or blank form value as `None` and parses anything else with `FromStr`.
pub fn empty_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let s = Option::<String>::deserialize(deserializer)?;

    match s.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse::<T>().map(Some).map_err(de::Error::custom),
    }
}

/// Like [`empty_as_none`] for unit enums that carry their names through serde.
pub fn empty_enum_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;

    match s.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => {
            let value: de::value::StrDeserializer<'_, D::Error> = s.into_deserializer();
            T::deserialize(value).map(Some)
        }
    }
}
