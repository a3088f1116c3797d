//! Deserializers for fields the API reports with inconsistent JSON types
//! across releases (e.g. `vmid` as a string for containers, `shared` as 0/1).

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum Number {
    Unsigned(u64),
    Float(f64),
    Text(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Int(i64),
    Text(String),
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn number_to_u64<E: serde::de::Error>(number: Number) -> Result<u64, E> {
    match number {
        Number::Unsigned(n) => Ok(n),
        Number::Float(f) if f >= 0.0 && f.is_finite() => Ok(f.round() as u64),
        Number::Float(f) => Err(E::custom(format!("expected a non-negative number, got {f}"))),
        Number::Text(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|e| E::custom(format!("invalid number '{s}': {e}"))),
    }
}

/// Deserialize an unsigned integer given as a number, float or numeric string.
pub fn u64_from_any<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    number_to_u64(Number::deserialize(deserializer)?)
}

/// Like [`u64_from_any`] but tolerates `null` or a missing field.
pub fn opt_u64_from_any<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Number>::deserialize(deserializer)?
        .map(number_to_u64)
        .transpose()
}

/// Deserialize a boolean given as `true`/`false`, `0`/`1` or `"0"`/`"1"`.
pub fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Flag>::deserialize(deserializer)? {
        None => Ok(false),
        Some(Flag::Bool(b)) => Ok(b),
        Some(Flag::Int(i)) => Ok(i != 0),
        Some(Flag::Text(s)) => match s.trim() {
            "" | "0" | "false" => Ok(false),
            "1" | "true" => Ok(true),
            other => Err(D::Error::custom(format!("invalid flag '{other}'"))),
        },
    }
}
