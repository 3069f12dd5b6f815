// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use kschema_ccsr::SchemaType;
use thiserror::Error;

/// An error encountered while encoding or decoding a message.
///
/// Errors are cloneable because a single failed schema resolution is
/// reported to every caller that was waiting on it.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The input is not framed in the Confluent wire format.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    /// The schema registry rejected a request or could not be reached.
    #[error(transparent)]
    Registry(#[from] kschema_ccsr::Error),
    /// A schema engine rejected a schema definition.
    #[error("invalid {schema_type} schema: {message}")]
    SchemaParse {
        schema_type: SchemaType,
        message: String,
    },
    /// A message does not conform to the schema it is encoded with.
    #[error("unable to encode message: {0}")]
    Encode(String),
    /// A payload does not conform to the schema it claims to be encoded with.
    #[error("unable to decode message: {0}")]
    Decode(String),
    /// A subject naming strategy was used without the inputs it requires.
    #[error("invalid use of {strategy}: {message}")]
    InvalidStrategyUsage {
        strategy: &'static str,
        message: String,
    },
    /// No engine is registered for a schema type.
    #[error("no schema engine registered for schema type {0}")]
    UnsupportedSchemaType(SchemaType),
    /// A schema was required to already exist under a subject but does not.
    #[error("schema is not registered under subject {subject}")]
    SchemaNotRegistered { subject: String },
}

impl Error {
    /// Reports whether the error came from the schema registry responding
    /// with a non-2xx status.
    pub fn is_registry_error(&self) -> bool {
        matches!(self, Error::Registry(kschema_ccsr::Error::Server { .. }))
    }

    /// Reports whether the error is a failure to reach the schema registry.
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Error::Registry(e) if e.is_transport())
    }
}
