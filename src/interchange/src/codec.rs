// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Encoding and decoding of messages in the Confluent wire format.

use std::sync::Arc;

use kschema_ccsr::{Registry, SCHEMA_NOT_FOUND, SUBJECT_NOT_FOUND};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::cache::SchemaCache;
use crate::definition::SchemaDefinition;
use crate::engine::{ParsedSchema, SchemaEngines};
use crate::envelope::{decode_envelope, encode_envelope};
use crate::naming::SubjectNameStrategy;
use crate::{Error, SchemaId};

/// How a schema definition that is not yet known to the cache obtains its
/// registry ID.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum RegistrationMode {
    /// Register the definition under the subject. Registering a schema that
    /// the subject already holds is idempotent and returns its existing ID.
    #[default]
    Register,
    /// Ask the registry whether the subject already holds the definition,
    /// and register it only if it does not.
    CheckThenRegister,
    /// Never register. The definition must match one of the subject's
    /// existing versions, newest first.
    LookupExisting,
}

/// Configures a [`ConfluentCodec`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Derives subjects in [`ConfluentCodec::encode_for_topic`].
    pub naming_strategy: SubjectNameStrategy,
    pub registration_mode: RegistrationMode,
}

impl CodecConfig {
    pub fn naming_strategy(mut self, naming_strategy: SubjectNameStrategy) -> CodecConfig {
        self.naming_strategy = naming_strategy;
        self
    }

    pub fn registration_mode(mut self, registration_mode: RegistrationMode) -> CodecConfig {
        self.registration_mode = registration_mode;
        self
    }
}

/// Encodes and decodes messages framed in the Confluent wire format,
/// resolving schemas through a schema registry.
///
/// Everything the codec learns from the registry is cached for the lifetime
/// of the codec, so each schema is fetched or registered at most once no
/// matter how many messages use it or how many tasks share the codec.
/// Clones share the same cache.
#[derive(Clone, Debug)]
pub struct ConfluentCodec {
    registry: Arc<dyn Registry>,
    engines: Arc<SchemaEngines>,
    cache: SchemaCache,
    config: CodecConfig,
}

impl ConfluentCodec {
    /// Constructs a codec with the default schema engines and configuration.
    pub fn new(registry: Arc<dyn Registry>) -> ConfluentCodec {
        ConfluentCodec::with_config(registry, SchemaEngines::default(), CodecConfig::default())
    }

    pub fn with_config(
        registry: Arc<dyn Registry>,
        engines: SchemaEngines,
        config: CodecConfig,
    ) -> ConfluentCodec {
        let engines = Arc::new(engines);
        ConfluentCodec {
            registry,
            cache: SchemaCache::new(Arc::clone(&engines)),
            engines,
            config,
        }
    }

    pub fn cache(&self) -> &SchemaCache {
        &self.cache
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Encodes `message` with `definition`, obtaining the definition's ID
    /// from `subject` according to the configured registration mode.
    ///
    /// The definition is parsed before the registry is consulted, so an
    /// invalid definition fails without any network traffic.
    pub async fn encode_by_definition(
        &self,
        subject: &str,
        definition: &SchemaDefinition,
        message: &Value,
    ) -> Result<Vec<u8>, Error> {
        let parsed = self.engines.parse(definition)?;
        self.encode_parsed(subject, definition, parsed, message)
            .await
    }

    /// Encodes `message` as the key (if `is_key`) or value of a message for
    /// `topic`, deriving the subject with the configured naming strategy.
    pub async fn encode_for_topic(
        &self,
        topic: &str,
        is_key: bool,
        definition: &SchemaDefinition,
        message: &Value,
    ) -> Result<Vec<u8>, Error> {
        let parsed = self.engines.parse(definition)?;
        let record_name = parsed.record_name();
        let subject = self
            .config
            .naming_strategy
            .subject(topic, is_key, record_name.as_deref())?;
        self.encode_parsed(&subject, definition, parsed, message)
            .await
    }

    async fn encode_parsed(
        &self,
        subject: &str,
        definition: &SchemaDefinition,
        parsed: Arc<dyn ParsedSchema>,
        message: &Value,
    ) -> Result<Vec<u8>, Error> {
        let registry = Arc::clone(&self.registry);
        let mode = self.config.registration_mode;
        let owned_subject = subject.to_string();
        let owned_definition = definition.clone();
        let id = self
            .cache
            .resolve_id_by_content(definition, Arc::clone(&parsed), move || {
                register(registry, mode, owned_subject, owned_definition)
            })
            .await?;
        let payload = parsed.to_bytes(message)?;
        Ok(encode_envelope(id, &payload))
    }

    /// Encodes `message` with the schema registered under `id`.
    pub async fn encode_by_id(&self, id: SchemaId, message: &Value) -> Result<Vec<u8>, Error> {
        let parsed = self.schema_by_id(id).await?;
        let payload = parsed.to_bytes(message)?;
        Ok(encode_envelope(id, &payload))
    }

    /// Encodes `message` with the latest schema registered under `subject`.
    pub async fn encode_by_subject(&self, subject: &str, message: &Value) -> Result<Vec<u8>, Error> {
        let (parsed, id) = self.schema_for_subject(subject).await?;
        let payload = parsed.to_bytes(message)?;
        Ok(encode_envelope(id, &payload))
    }

    /// Returns the latest schema registered under `subject` and its ID.
    ///
    /// The answer is cached: later versions registered under the subject
    /// are not observed until the cache is cleared.
    pub async fn schema_for_subject(
        &self,
        subject: &str,
    ) -> Result<(Arc<dyn ParsedSchema>, SchemaId), Error> {
        let registry = Arc::clone(&self.registry);
        let owned_subject = subject.to_string();
        self.cache
            .resolve_by_name(subject, move || async move {
                registry.get_latest_schema(&owned_subject).await
            })
            .await
    }

    /// Returns the schema registered under `id`.
    pub async fn schema_by_id(&self, id: SchemaId) -> Result<Arc<dyn ParsedSchema>, Error> {
        let registry = Arc::clone(&self.registry);
        self.cache
            .resolve_by_id(id, move || async move { registry.get_schema_by_id(id).await })
            .await
    }

    /// Decodes a message framed in the Confluent wire format.
    ///
    /// The envelope is validated before the registry is consulted, so
    /// malformed input fails without any network traffic.
    pub async fn decode(&self, bytes: &[u8]) -> Result<Value, Error> {
        let (id, payload) = decode_envelope(bytes)?;
        let parsed = self.schema_by_id(id).await?;
        parsed.from_bytes(payload)
    }
}

/// Obtains the registry ID of `definition` under `subject`.
async fn register(
    registry: Arc<dyn Registry>,
    mode: RegistrationMode,
    subject: String,
    definition: SchemaDefinition,
) -> Result<SchemaId, Error> {
    match mode {
        RegistrationMode::Register => publish(&*registry, &subject, &definition).await,
        RegistrationMode::CheckThenRegister => {
            let existing = registry
                .lookup_schema(
                    &subject,
                    definition.raw(),
                    definition.schema_type(),
                    definition.references(),
                )
                .await;
            match existing {
                Ok(existing) => Ok(existing.schema.id),
                Err(e) if matches!(e.code(), Some(404 | SUBJECT_NOT_FOUND | SCHEMA_NOT_FOUND)) => {
                    publish(&*registry, &subject, &definition).await
                }
                Err(e) => Err(e.into()),
            }
        }
        RegistrationMode::LookupExisting => {
            let mut versions = match registry.list_subject_versions(&subject).await {
                Ok(versions) => versions,
                Err(e) if e.is_not_found() => return Err(Error::SchemaNotRegistered { subject }),
                Err(e) => return Err(e.into()),
            };
            versions.sort_unstable_by(|a, b| b.cmp(a));
            for version in versions {
                let candidate = registry.get_subject_version(&subject, version).await?;
                let candidate_definition =
                    SchemaDefinition::new(candidate.schema.schema_type, candidate.schema.raw);
                if candidate_definition.same_content(&definition) {
                    info!(
                        "found schema {} as version {} of subject {}",
                        candidate.schema.id, version, subject
                    );
                    return Ok(candidate.schema.id);
                }
            }
            Err(Error::SchemaNotRegistered { subject })
        }
    }
}

async fn publish(
    registry: &dyn Registry,
    subject: &str,
    definition: &SchemaDefinition,
) -> Result<SchemaId, Error> {
    info!("registering {} schema under subject {}", definition.schema_type(), subject);
    let id = registry
        .publish_schema(
            subject,
            definition.raw(),
            definition.schema_type(),
            definition.references(),
        )
        .await?;
    info!("schema registered under subject {} with ID {}", subject, id);
    Ok(id)
}
