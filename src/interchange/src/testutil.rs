// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! An in-memory schema registry that counts the requests made of it.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use kschema_ccsr::{
    Error, Registry, Schema, SchemaReference, SchemaType, Subject, SCHEMA_NOT_FOUND,
    SUBJECT_NOT_FOUND, VERSION_NOT_FOUND,
};

use crate::SchemaDefinition;

#[derive(Debug, Default)]
pub struct MemoryRegistry {
    state: Mutex<State>,
    delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct State {
    /// Schema `i` has ID `i + 1`.
    schemas: Vec<Schema>,
    /// Version `i` of each subject is the ID at index `i - 1`.
    subjects: BTreeMap<String, Vec<u32>>,
    calls: BTreeMap<&'static str, usize>,
    failures: usize,
}

fn not_found(code: i32, message: &str) -> Error {
    Error::Server {
        code,
        message: message.into(),
    }
}

impl State {
    fn find(&self, schema: &str, schema_type: SchemaType) -> Option<u32> {
        let definition = SchemaDefinition::new(schema_type, schema);
        self.schemas
            .iter()
            .find(|s| SchemaDefinition::new(s.schema_type, s.raw.as_str()).same_content(&definition))
            .map(|s| s.id)
    }

    fn add(&mut self, subject: &str, schema: &str, schema_type: SchemaType) -> u32 {
        let id = match self.find(schema, schema_type) {
            Some(id) => id,
            None => {
                let id = u32::try_from(self.schemas.len() + 1).expect("too many schemas");
                self.schemas.push(Schema {
                    id,
                    raw: schema.into(),
                    schema_type,
                });
                id
            }
        };
        let versions = self.subjects.entry(subject.into()).or_default();
        if !versions.contains(&id) {
            versions.push(id);
        }
        id
    }

    fn subject(&self, subject: &str, version: i32) -> Result<Subject, Error> {
        let versions = self
            .subjects
            .get(subject)
            .ok_or_else(|| not_found(SUBJECT_NOT_FOUND, "Subject not found"))?;
        let id = usize::try_from(version - 1)
            .ok()
            .and_then(|i| versions.get(i))
            .ok_or_else(|| not_found(VERSION_NOT_FOUND, "Version not found"))?;
        Ok(Subject {
            schema: self.schemas[usize::try_from(*id - 1).unwrap()].clone(),
            version,
            name: subject.into(),
        })
    }
}

impl MemoryRegistry {
    pub fn new() -> MemoryRegistry {
        MemoryRegistry::default()
    }

    /// Makes every request sleep for `delay` before it is answered.
    pub fn with_delay(delay: Duration) -> MemoryRegistry {
        MemoryRegistry {
            delay: Some(delay),
            ..Default::default()
        }
    }

    /// Registers a schema without counting a request.
    pub fn add_schema(&self, subject: &str, schema: &str, schema_type: SchemaType) -> u32 {
        self.state
            .lock()
            .unwrap()
            .add(subject, schema, schema_type)
    }

    /// Makes the next `n` requests fail with a server error.
    pub fn fail_next(&self, n: usize) {
        self.state.lock().unwrap().failures = n;
    }

    /// The number of requests made of `method`.
    pub fn calls(&self, method: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(method)
            .copied()
            .unwrap_or(0)
    }

    /// Reports whether any schema has been registered under `subject`.
    pub fn has_subject(&self, subject: &str) -> bool {
        self.state.lock().unwrap().subjects.contains_key(subject)
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().unwrap().calls.values().sum()
    }

    async fn request<T>(
        &self,
        method: &'static str,
        f: impl FnOnce(&mut State) -> Result<T, Error>,
    ) -> Result<T, Error> {
        {
            let mut state = self.state.lock().unwrap();
            *state.calls.entry(method).or_default() += 1;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        if state.failures > 0 {
            state.failures -= 1;
            return Err(Error::Server {
                code: 50001,
                message: "injected failure".into(),
            });
        }
        f(&mut state)
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn get_schema_by_id(&self, id: u32) -> Result<Schema, Error> {
        self.request("get_schema_by_id", |state| {
            state
                .schemas
                .iter()
                .find(|s| s.id == id)
                .cloned()
                .ok_or_else(|| not_found(SCHEMA_NOT_FOUND, "Schema not found"))
        })
        .await
    }

    async fn publish_schema(
        &self,
        subject: &str,
        schema: &str,
        schema_type: SchemaType,
        _: &[SchemaReference],
    ) -> Result<u32, Error> {
        self.request("publish_schema", |state| {
            Ok(state.add(subject, schema, schema_type))
        })
        .await
    }

    async fn lookup_schema(
        &self,
        subject: &str,
        schema: &str,
        schema_type: SchemaType,
        _: &[SchemaReference],
    ) -> Result<Subject, Error> {
        self.request("lookup_schema", |state| {
            let versions = state
                .subjects
                .get(subject)
                .ok_or_else(|| not_found(SUBJECT_NOT_FOUND, "Subject not found"))?;
            let id = state
                .find(schema, schema_type)
                .filter(|id| versions.contains(id))
                .ok_or_else(|| not_found(SCHEMA_NOT_FOUND, "Schema not found"))?;
            let position = versions.iter().position(|v| *v == id).unwrap();
            state.subject(subject, i32::try_from(position + 1).unwrap())
        })
        .await
    }

    async fn list_subject_versions(&self, subject: &str) -> Result<Vec<i32>, Error> {
        self.request("list_subject_versions", |state| {
            let versions = state
                .subjects
                .get(subject)
                .ok_or_else(|| not_found(SUBJECT_NOT_FOUND, "Subject not found"))?;
            Ok((1..=i32::try_from(versions.len()).unwrap()).collect())
        })
        .await
    }

    async fn get_subject_version(&self, subject: &str, version: i32) -> Result<Subject, Error> {
        self.request("get_subject_version", |state| {
            state.subject(subject, version)
        })
        .await
    }
}
