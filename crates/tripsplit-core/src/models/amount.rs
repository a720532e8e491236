//! Serde helpers for monetary fields.
//!
//! The backend serializes `Decimal` columns as JSON strings ("85.50") in
//! pydantic responses but as floats in the balance endpoints, so amounts are
//! accepted in either form and always written back as numbers.

use serde::{de, Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    String(String),
}

fn parse<E: de::Error>(raw: NumberOrString) -> Result<f64, E> {
    match raw {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| E::custom(format!("invalid amount: {:?}", s))),
    }
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    parse(NumberOrString::deserialize(deserializer)?)
}

pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<NumberOrString>::deserialize(deserializer)? {
        Some(raw) => parse(raw).map(Some),
        None => Ok(None),
    }
}
