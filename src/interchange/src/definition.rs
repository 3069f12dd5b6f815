// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Caller-supplied schema definitions and their canonical form.

use kschema_ccsr::{SchemaReference, SchemaType};
use serde_json::Value;

/// The key under which a definition's registry ID is cached.
pub type ContentKey = (SchemaType, String);

/// A schema definition that may or may not be registered yet.
///
/// Definitions that are JSON documents (all Avro and JSON Schema
/// definitions) are keyed by their canonical serialization: object keys
/// sorted, no insignificant whitespace. Two definitions that differ only in
/// key order or formatting are therefore the same definition. Other
/// definitions, such as Protobuf IDL, are keyed by their verbatim text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaDefinition {
    schema_type: SchemaType,
    raw: String,
    canonical: String,
    references: Vec<SchemaReference>,
}

impl SchemaDefinition {
    /// Constructs a definition of the given type from its text.
    pub fn new(schema_type: SchemaType, raw: impl Into<String>) -> SchemaDefinition {
        let raw = raw.into();
        let canonical = match serde_json::from_str::<Value>(&raw) {
            Ok(value) => canonical_json(&value),
            Err(_) => raw.clone(),
        };
        SchemaDefinition {
            schema_type,
            raw,
            canonical,
            references: Vec::new(),
        }
    }

    /// Constructs an Avro definition from its text.
    pub fn avro(raw: impl Into<String>) -> SchemaDefinition {
        SchemaDefinition::new(SchemaType::Avro, raw)
    }

    /// Constructs a JSON Schema definition from its text.
    pub fn json(raw: impl Into<String>) -> SchemaDefinition {
        SchemaDefinition::new(SchemaType::Json, raw)
    }

    /// Constructs a definition from an already-parsed JSON document.
    pub fn from_value(schema_type: SchemaType, value: &Value) -> SchemaDefinition {
        let canonical = canonical_json(value);
        SchemaDefinition {
            schema_type,
            raw: canonical.clone(),
            canonical,
            references: Vec::new(),
        }
    }

    /// Attaches references to other registered schemas, which are forwarded
    /// to the registry when the definition is registered.
    pub fn with_references(mut self, references: Vec<SchemaReference>) -> SchemaDefinition {
        self.references = references;
        self
    }

    pub fn schema_type(&self) -> SchemaType {
        self.schema_type
    }

    /// The definition text as supplied.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The canonical form of the definition.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    pub fn references(&self) -> &[SchemaReference] {
        &self.references
    }

    /// Returns the key under which this definition's ID is cached.
    pub fn content_key(&self) -> ContentKey {
        (self.schema_type, self.canonical.clone())
    }

    /// Reports whether two definitions describe the same schema.
    pub fn same_content(&self, other: &SchemaDefinition) -> bool {
        self.schema_type == other.schema_type && self.canonical == other.canonical
    }
}

/// Serializes `value` with object keys sorted at every level.
///
/// `serde_json::Map` keeps insertion order instead of sorting once any crate
/// in the build enables `preserve_order`, so the sort is done here.
fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::from(key.as_str()).to_string());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
