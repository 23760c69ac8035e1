// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Canonical JSON encoding.
//!
//! Every structure that is signed and verified, or encrypted and decrypted,
//! across the channel boundary goes through [`to_vec`]: compact JSON with no
//! insignificant whitespace and object keys sorted by their UTF-8 bytes at
//! every nesting level. Both endpoints use this function, so the byte
//! sequence a signature covers never depends on struct field order or on
//! which side produced the value.

use serde::Serialize;
use serde_json::{Map, Value};

/// Serialize `value` into its canonical byte form.
pub fn to_vec<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    serde_json::to_vec(&canonicalize(value))
}

/// Canonical form of an already-parsed JSON value.
pub fn value_to_vec(value: &Value) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&canonicalize(value.clone()))
}

/// Rebuild every object with its keys in sorted order. Sorting is explicit
/// so the output holds with `serde_json/preserve_order` enabled.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            let mut sorted = Map::with_capacity(entries.len());
            for (key, value) in entries {
                sorted.insert(key, canonicalize(value));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
