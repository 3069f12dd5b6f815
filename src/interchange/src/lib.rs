// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Encoding and decoding of schema-identified messages in the Confluent wire
//! format.
//!
//! Every message is framed by a five byte envelope (see [`envelope`]) naming
//! the registry ID of the schema that encoded the payload. [`ConfluentCodec`]
//! ties together a schema registry, the [schema engines](engine) that turn
//! messages into bytes and back, and a [`SchemaCache`] that remembers what
//! the registry has already told us.

#![deny(missing_debug_implementations)]

pub mod avro;
pub mod cache;
pub mod codec;
pub mod definition;
pub mod engine;
pub mod envelope;
mod error;
pub mod json;
pub mod naming;

#[cfg(test)]
mod testutil;

pub use cache::SchemaCache;
pub use codec::{CodecConfig, ConfluentCodec, RegistrationMode};
pub use definition::SchemaDefinition;
pub use engine::{ParsedSchema, SchemaEngine, SchemaEngines};
pub use error::Error;
pub use naming::{subject_for, SubjectNameStrategy};

/// The identifier a schema registry assigns to a schema.
pub type SchemaId = u32;
