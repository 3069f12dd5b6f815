// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Subject naming strategies.
//!
//! These mirror the strategies of the same names in the Confluent
//! serializers, so that schemas registered through this crate land under
//! the subjects other Confluent clients expect.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Derives the registry subject for the key or value schema of a topic.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum SubjectNameStrategy {
    /// `<topic>-key` or `<topic>-value`.
    #[default]
    TopicName,
    /// `<topic>-<record name>`.
    TopicRecordName,
    /// `<record name>`.
    RecordName,
}

impl SubjectNameStrategy {
    fn name(&self) -> &'static str {
        match self {
            SubjectNameStrategy::TopicName => "TopicNameStrategy",
            SubjectNameStrategy::TopicRecordName => "TopicRecordNameStrategy",
            SubjectNameStrategy::RecordName => "RecordNameStrategy",
        }
    }

    /// Computes the subject name.
    ///
    /// `record_name` is the fully qualified name of the record being
    /// encoded. The record-based strategies fail with
    /// [`Error::InvalidStrategyUsage`] when it is absent.
    pub fn subject(
        &self,
        topic: &str,
        is_key: bool,
        record_name: Option<&str>,
    ) -> Result<String, Error> {
        match self {
            SubjectNameStrategy::TopicName => {
                let suffix = if is_key { "key" } else { "value" };
                Ok(format!("{topic}-{suffix}"))
            }
            SubjectNameStrategy::TopicRecordName => {
                Ok(format!("{topic}-{}", self.require_record_name(record_name)?))
            }
            SubjectNameStrategy::RecordName => {
                Ok(self.require_record_name(record_name)?.to_string())
            }
        }
    }

    fn require_record_name<'a>(&self, record_name: Option<&'a str>) -> Result<&'a str, Error> {
        match record_name {
            Some(name) if !name.is_empty() => Ok(name),
            _ => Err(Error::InvalidStrategyUsage {
                strategy: self.name(),
                message: "the schema does not describe a named record".into(),
            }),
        }
    }
}

impl fmt::Display for SubjectNameStrategy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SubjectNameStrategy {
    type Err = String;

    /// Accepts the Confluent class names, with or without their package
    /// prefix, as well as the bare variant names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.rsplit('.').next().unwrap_or(s);
        match name {
            "TopicNameStrategy" | "TopicName" => Ok(SubjectNameStrategy::TopicName),
            "TopicRecordNameStrategy" | "TopicRecordName" => {
                Ok(SubjectNameStrategy::TopicRecordName)
            }
            "RecordNameStrategy" | "RecordName" => Ok(SubjectNameStrategy::RecordName),
            _ => Err(format!("unknown subject name strategy: {s}")),
        }
    }
}

/// Computes the subject for `topic` under `strategy`.
///
/// See [`SubjectNameStrategy::subject`].
pub fn subject_for(
    topic: &str,
    is_key: bool,
    record_name: Option<&str>,
    strategy: SubjectNameStrategy,
) -> Result<String, Error> {
    strategy.subject(topic, is_key, record_name)
}
