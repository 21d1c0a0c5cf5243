//! Migration of loaded or imported JSON into the canonical [`Registry`].
//!
//! Blobs written by older versions of the page stored contributors as bare
//! `{ nome, qtd }` pairs, and hand-edited exports use a handful of alternative
//! field names. Everything is funnelled through [`migrate`] once, so the rest
//! of the crate only ever sees the typed structure.

use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::warn;

use crate::cities;
use crate::error::SchemaError;
use crate::ids;
use crate::types::{ContributionRecord, Contributor, Registry};

pub const ANONYMOUS: &str = "Anônimo";

const CONTRIBUTORS_KEYS: &[&str] = &["usuarios", "contribuicoes", "contributors"];
const NAME_KEYS: &[&str] = &["nome", "name"];
const QUANTITY_KEYS: &[&str] = &["qtd", "quantidade", "quantity", "arvores"];
const VERIFIED_KEYS: &[&str] = &["verificado", "verified"];

/// Turns any JSON value into a normalized registry. The top level must be an
/// object; every other irregularity is repaired or skipped.
pub fn migrate(value: Value) -> Result<Registry, SchemaError> {
    let entries = match value {
        Value::Object(entries) => entries,
        other => {
            return Err(SchemaError::NotAnObject {
                found: kind_of(&other),
            })
        }
    };

    let mut registry = Registry::new();
    for (city, raw) in entries {
        let fields = match raw {
            Value::Object(fields) => fields,
            other => {
                warn!(city = %city, found = kind_of(&other), "Skipping record that is not an object");
                continue;
            }
        };
        let record = migrate_record(&city, &fields);
        registry.insert_record(city, record);
    }
    registry.normalize();
    Ok(registry)
}

fn migrate_record(city: &str, fields: &Map<String, Value>) -> ContributionRecord {
    let known = cities::find(city);
    let lat = fields.get("lat").and_then(as_f64).or(known.map(|c| c.lat));
    let lon = fields.get("lon").and_then(as_f64).or(known.map(|c| c.lon));
    let (lat, lon) = match (lat, lon) {
        (Some(lat), Some(lon)) => (lat, lon),
        _ => {
            warn!(city = %city, "Record has no coordinates, placing it at 0,0");
            (lat.unwrap_or(0.0), lon.unwrap_or(0.0))
        }
    };

    let mut record = ContributionRecord::new(lat, lon);
    let raw_list = lookup(fields, CONTRIBUTORS_KEYS)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let users: Vec<&Map<String, Value>> = raw_list
        .iter()
        .filter_map(|raw| match raw {
            Value::Object(user) => Some(user),
            _ => {
                warn!(city = %city, "Skipping contributor that is not an object");
                None
            }
        })
        .collect();

    // Usable stored ids are reserved first; the first occurrence of a duplicate keeps it.
    let mut taken = HashSet::new();
    let stored_ids: Vec<Option<u64>> = users
        .iter()
        .map(|user| user.get("id").and_then(as_id).filter(|id| taken.insert(*id)))
        .collect();

    let mut total: u64 = 0;
    for (position, (user, stored_id)) in users.into_iter().zip(stored_ids).enumerate() {
        let id = stored_id.unwrap_or_else(|| ids::derived_id(position, &mut taken));
        let mut contributor = migrate_contributor(id, user);
        if total.checked_add(contributor.quantity).is_none() {
            warn!(city = %city, id, "Clamping quantity that would overflow the city total");
            contributor.quantity = u64::MAX - total;
        }
        total += contributor.quantity;
        record.contributors.push(contributor);
    }
    record.recompute_total();
    record
}

fn migrate_contributor(id: u64, user: &Map<String, Value>) -> Contributor {
    let name = lookup(user, NAME_KEYS)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(ANONYMOUS)
        .to_string();

    let quantity = lookup(user, QUANTITY_KEYS).map(as_quantity).unwrap_or(0);

    let verified = lookup(user, VERIFIED_KEYS).map(as_bool).unwrap_or(false);

    Contributor {
        id,
        name,
        quantity,
        verified,
    }
}

fn lookup<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| fields.get(*key))
}

fn as_f64(value: &Value) -> Option<f64> {
    let parsed: Option<f64> = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

// Ids the page cannot hold exactly as a JS number count as missing.
fn as_id(value: &Value) -> Option<u64> {
    let id = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    id.filter(|id| *id <= ids::MAX_SAFE_ID)
}

// Negative, fractional and malformed quantities collapse to a non-negative integer.
fn as_quantity(value: &Value) -> u64 {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() && v > 0.0 => v.trunc() as u64,
        _ => 0,
    }
}

fn as_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64() == Some(1),
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
