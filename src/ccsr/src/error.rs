// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Errors returned by the schema registry client.
//!
//! [`Error`] distinguishes three failure modes:
//! * [`Error::Server`]: the registry answered with a non-2xx status. When the
//!   body carried the registry's JSON error document, its `error_code` and
//!   `message` are propagated verbatim.
//! * [`Error::Transport`]: the request never produced a usable response
//!   (DNS failure, refused connection, timeout, undecodable body).
//! * [`Error::InvalidResponse`]: the registry answered successfully but with
//!   content that violates the API contract.
//!
//! The error is cheaply cloneable so that a single failed request can be
//! reported to every caller that was waiting on it.

use std::sync::Arc;

use reqwest::StatusCode;
use thiserror::Error;

/// Error code reported by the registry when a subject does not exist.
pub const SUBJECT_NOT_FOUND: i32 = 40401;
/// Error code reported by the registry when a version does not exist.
pub const VERSION_NOT_FOUND: i32 = 40402;
/// Error code reported by the registry when a schema does not exist.
pub const SCHEMA_NOT_FOUND: i32 = 40403;
/// Error code reported by the registry when a schema is invalid.
pub const INVALID_SCHEMA: i32 = 42201;
/// Error code reported by the registry when a schema is incompatible with
/// the subject's existing versions.
pub const INCOMPATIBLE_SCHEMA: i32 = 409;

/// An error returned by a schema registry request.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The registry responded with a non-2xx status.
    #[error("Schema registry error: {code} - {message}")]
    Server {
        /// The registry error code, or the HTTP status code when the response
        /// did not include error details.
        code: i32,
        /// A detailed message about the error conditions.
        message: String,
    },
    /// A transport error from the `reqwest` crate during a network request.
    #[error("schema registry transport error: {0}")]
    Transport(Arc<reqwest::Error>),
    /// The registry returned a successful response that could not be used.
    #[error("invalid schema registry response: {0}")]
    InvalidResponse(String),
}

impl Error {
    /// Constructs a [`Error::Server`] for a response whose body could not be
    /// interpreted as a registry error document.
    pub(crate) fn undecodable(status: StatusCode) -> Error {
        Error::Server {
            code: i32::from(status.as_u16()),
            message: "unable to decode error details".into(),
        }
    }

    /// Returns the registry error code if the registry itself reported this
    /// error.
    pub fn code(&self) -> Option<i32> {
        match self {
            Error::Server { code, .. } => Some(*code),
            Error::Transport(_) | Error::InvalidResponse(_) => None,
        }
    }

    /// Reports whether the registry indicated that the requested subject,
    /// version or schema does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.code(),
            Some(404 | SUBJECT_NOT_FOUND | VERSION_NOT_FOUND | SCHEMA_NOT_FOUND)
        )
    }

    /// Reports whether the error occurred below the HTTP layer.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Error {
        Error::Transport(Arc::new(e))
    }
}
