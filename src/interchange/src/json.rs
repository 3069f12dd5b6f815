// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The JSON schema engine.
//!
//! JSON schemas are checked for well-formedness only. Messages are not
//! validated against them; payloads are the compact JSON serialization of
//! the message.

use std::sync::Arc;

use kschema_ccsr::SchemaType;
use serde_json::Value;

use crate::definition::SchemaDefinition;
use crate::engine::{ParsedSchema, SchemaEngine};
use crate::Error;

#[derive(Clone, Copy, Debug, Default)]
pub struct JsonEngine;

impl SchemaEngine for JsonEngine {
    fn parse(&self, definition: &SchemaDefinition) -> Result<Arc<dyn ParsedSchema>, Error> {
        let schema: Value =
            serde_json::from_str(definition.raw()).map_err(|e| Error::SchemaParse {
                schema_type: SchemaType::Json,
                message: e.to_string(),
            })?;
        Ok(Arc::new(JsonSchema {
            schema,
            canonical: definition.canonical().to_string(),
        }))
    }
}

/// A well-formed JSON schema document.
#[derive(Clone, Debug)]
pub struct JsonSchema {
    schema: Value,
    canonical: String,
}

impl JsonSchema {
    pub fn schema(&self) -> &Value {
        &self.schema
    }
}

impl ParsedSchema for JsonSchema {
    fn schema_type(&self) -> SchemaType {
        SchemaType::Json
    }

    fn canonical_form(&self) -> String {
        self.canonical.clone()
    }

    fn record_name(&self) -> Option<String> {
        self.schema
            .get("title")
            .and_then(|title| title.as_str())
            .map(String::from)
    }

    fn to_bytes(&self, message: &Value) -> Result<Vec<u8>, Error> {
        serde_json::to_vec(message).map_err(|e| Error::Encode(e.to_string()))
    }

    fn from_bytes(&self, bytes: &[u8]) -> Result<Value, Error> {
        serde_json::from_slice(bytes).map_err(|e| Error::Decode(e.to_string()))
    }
}
