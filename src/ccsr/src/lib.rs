// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The `ccsr` crate provides an ergonomic API client for Confluent-compatible
//! schema registries (CCSRs).
//!
//! The only CCSR implementation that is explicitly supported is [Confluent's
//! own schema registry][confluent-sr], but the API is simple enough that other
//! implementations that follow the same REST contract should work too.
//!
//! # Example usage
//!
//! ```no_run
//! use kschema_ccsr::{ClientConfig, Registry, SchemaType};
//!
//! # async fn example() -> Result<(), anyhow::Error> {
//! let client = ClientConfig::from_url_str("http://localhost:8081")?.build()?;
//!
//! let id = client
//!     .publish_schema("orders-value", r#""string""#, SchemaType::Avro, &[])
//!     .await?;
//! let schema = client.get_schema_by_id(id).await?;
//! assert_eq!(schema.raw, r#""string""#);
//! # Ok(())
//! # }
//! ```
//!
//! The [`Registry`] trait captures the subset of the API that the encoding
//! machinery in `kschema-interchange` depends on, so that alternative
//! transports (and in-memory fakes) can stand in for [`Client`].
//!
//! [confluent-sr]: https://docs.confluent.io/current/schema-registry/index.html

#![warn(missing_debug_implementations)]

mod client;
mod config;
mod error;
pub mod tls;

pub use client::*;
pub use config::{Auth, ClientConfig};
pub use error::{
    Error, INCOMPATIBLE_SCHEMA, INVALID_SCHEMA, SCHEMA_NOT_FOUND, SUBJECT_NOT_FOUND, VERSION_NOT_FOUND,
};
