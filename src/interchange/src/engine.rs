// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Pluggable schema engines.
//!
//! A [`SchemaEngine`] turns a [`SchemaDefinition`] into a [`ParsedSchema`],
//! which can in turn encode messages to bytes and decode them again. Engines
//! are looked up by [`SchemaType`] in a [`SchemaEngines`] table, so the
//! resolution machinery never needs to know which serialization format backs
//! a given schema.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use kschema_ccsr::SchemaType;
use serde_json::Value;

use crate::avro::AvroEngine;
use crate::definition::SchemaDefinition;
use crate::json::JsonEngine;
use crate::Error;

/// Parses schema definitions of one schema type.
pub trait SchemaEngine: fmt::Debug + Send + Sync {
    /// Parses `definition`, failing with [`Error::SchemaParse`] if it is not
    /// a valid schema.
    fn parse(&self, definition: &SchemaDefinition) -> Result<Arc<dyn ParsedSchema>, Error>;
}

/// A validated schema capable of encoding and decoding messages.
pub trait ParsedSchema: fmt::Debug + Send + Sync {
    fn schema_type(&self) -> SchemaType;

    /// A normalized rendering of the schema, suitable for comparing two
    /// schemas for equivalence.
    fn canonical_form(&self) -> String;

    /// The fully qualified name of the record this schema describes, if the
    /// schema is a named record.
    fn record_name(&self) -> Option<String> {
        None
    }

    /// Encodes `message`, failing with [`Error::Encode`] if it does not
    /// conform to the schema.
    fn to_bytes(&self, message: &Value) -> Result<Vec<u8>, Error>;

    /// Decodes `bytes`, failing with [`Error::Decode`] if they are not a
    /// valid encoding under the schema.
    fn from_bytes(&self, bytes: &[u8]) -> Result<Value, Error>;
}

/// A table of schema engines keyed by schema type.
#[derive(Clone, Debug)]
pub struct SchemaEngines {
    engines: BTreeMap<SchemaType, Arc<dyn SchemaEngine>>,
}

impl Default for SchemaEngines {
    /// Returns a table with the Avro and JSON engines installed.
    fn default() -> SchemaEngines {
        let mut engines = SchemaEngines::empty();
        engines.register(SchemaType::Avro, Arc::new(AvroEngine));
        engines.register(SchemaType::Json, Arc::new(JsonEngine));
        engines
    }
}

impl SchemaEngines {
    /// Returns a table with no engines installed.
    pub fn empty() -> SchemaEngines {
        SchemaEngines {
            engines: BTreeMap::new(),
        }
    }

    /// Installs `engine` for `schema_type`, returning the engine it replaces.
    pub fn register(
        &mut self,
        schema_type: SchemaType,
        engine: Arc<dyn SchemaEngine>,
    ) -> Option<Arc<dyn SchemaEngine>> {
        self.engines.insert(schema_type, engine)
    }

    /// Reports whether an engine is installed for `schema_type`.
    pub fn supports(&self, schema_type: SchemaType) -> bool {
        self.engines.contains_key(&schema_type)
    }

    /// Returns the engine for `schema_type`.
    pub fn get(&self, schema_type: SchemaType) -> Result<&Arc<dyn SchemaEngine>, Error> {
        self.engines
            .get(&schema_type)
            .ok_or(Error::UnsupportedSchemaType(schema_type))
    }

    /// Parses `definition` with the engine for its schema type.
    pub fn parse(&self, definition: &SchemaDefinition) -> Result<Arc<dyn ParsedSchema>, Error> {
        self.get(definition.schema_type())?.parse(definition)
    }
}
