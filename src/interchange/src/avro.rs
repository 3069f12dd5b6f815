// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The Avro schema engine.
//!
//! Messages are represented as JSON values and are resolved against the
//! schema before encoding, so JSON objects become records, integral numbers
//! narrow to `int` where the schema asks for one, strings become enum
//! symbols, and so on. Payloads are raw Avro datums, without the object
//! container framing.

use std::sync::Arc;

use apache_avro::types::Value as AvroValue;
use apache_avro::Schema;
use kschema_ccsr::SchemaType;
use serde_json::Value;

use crate::definition::SchemaDefinition;
use crate::engine::{ParsedSchema, SchemaEngine};
use crate::Error;

/// Parses Avro schemas with `apache-avro`.
#[derive(Clone, Copy, Debug, Default)]
pub struct AvroEngine;

impl SchemaEngine for AvroEngine {
    fn parse(&self, definition: &SchemaDefinition) -> Result<Arc<dyn ParsedSchema>, Error> {
        Ok(Arc::new(AvroSchema::parse(definition.raw())?))
    }
}

/// A parsed Avro schema.
#[derive(Clone, Debug)]
pub struct AvroSchema {
    schema: Schema,
}

impl AvroSchema {
    pub fn parse(raw: &str) -> Result<AvroSchema, Error> {
        let schema = Schema::parse_str(raw).map_err(|e| Error::SchemaParse {
            schema_type: SchemaType::Avro,
            message: e.to_string(),
        })?;
        Ok(AvroSchema { schema })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

impl ParsedSchema for AvroSchema {
    fn schema_type(&self) -> SchemaType {
        SchemaType::Avro
    }

    fn canonical_form(&self) -> String {
        self.schema.canonical_form()
    }

    fn record_name(&self) -> Option<String> {
        match &self.schema {
            Schema::Record(record) => Some(record.name.fullname(None)),
            _ => None,
        }
    }

    fn to_bytes(&self, message: &Value) -> Result<Vec<u8>, Error> {
        let value = AvroValue::from(message.clone())
            .resolve(&self.schema)
            .map_err(|e| Error::Encode(e.to_string()))?;
        check_narrowing(&value, message)?;
        apache_avro::to_avro_datum(&self.schema, value).map_err(|e| Error::Encode(e.to_string()))
    }

    fn from_bytes(&self, mut bytes: &[u8]) -> Result<Value, Error> {
        let value = apache_avro::from_avro_datum(&self.schema, &mut bytes, None)
            .map_err(|e| Error::Decode(e.to_string()))?;
        if !bytes.is_empty() {
            return Err(Error::Decode(format!(
                "{} trailing bytes after Avro datum",
                bytes.len()
            )));
        }
        // Input that ends mid-datum can decode as a bare null.
        if !value.validate(&self.schema) {
            return Err(Error::Decode("datum does not match the schema".into()));
        }
        Value::try_from(value).map_err(|e| Error::Decode(e.to_string()))
    }
}

/// Fails if resolving `message` truncated one of its integers to 32 bits.
///
/// JSON integers enter as Avro `long`s, and resolution against an `int`
/// (or a logical type backed by one) narrows them without a range check.
fn check_narrowing(resolved: &AvroValue, message: &Value) -> Result<(), Error> {
    match resolved {
        AvroValue::Int(n) | AvroValue::Date(n) | AvroValue::TimeMillis(n) => {
            if message.as_i64() == Some(i64::from(*n)) {
                Ok(())
            } else {
                Err(Error::Encode(format!(
                    "{} is out of range for an Avro int",
                    message
                )))
            }
        }
        AvroValue::Union(_, inner) => check_narrowing(inner, message),
        AvroValue::Record(fields) => {
            for (name, value) in fields {
                // Absent fields were filled from their defaults.
                if let Some(field) = message.get(name) {
                    check_narrowing(value, field)?;
                }
            }
            Ok(())
        }
        AvroValue::Map(entries) => {
            for (key, value) in entries {
                if let Some(entry) = message.get(key) {
                    check_narrowing(value, entry)?;
                }
            }
            Ok(())
        }
        AvroValue::Array(items) => match message.as_array() {
            Some(elements) => items
                .iter()
                .zip(elements)
                .try_for_each(|(item, element)| check_narrowing(item, element)),
            None => Ok(()),
        },
        _ => Ok(()),
    }
}
