// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Auth;
use crate::error::Error;

/// The media type spoken by Confluent-compatible schema registries.
pub const CONTENT_TYPE: &str = "application/vnd.schemaregistry.v1+json";

/// An API client for a Confluent-compatible schema registry.
#[derive(Clone)]
pub struct Client {
    inner: reqwest::Client,
    url: Url,
    auth: Option<Auth>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Client")
            .field("inner", &self.inner)
            .field("url", &self.url.as_str())
            .field("auth", &self.auth.as_ref().map(|a| &a.username))
            .finish()
    }
}

impl Client {
    pub(crate) fn new(
        inner: reqwest::Client,
        url: Url,
        auth: Option<Auth>,
    ) -> Result<Self, anyhow::Error> {
        if url.cannot_be_a_base() {
            bail!("cannot construct a CCSR client with a cannot-be-a-base URL");
        }
        Ok(Client { inner, url, auth })
    }

    fn make_request<P>(&self, method: Method, path: P) -> reqwest::RequestBuilder
    where
        P: IntoIterator,
        P::Item: AsRef<str>,
    {
        let mut url = self.url.clone();
        url.path_segments_mut()
            .expect("constructor validated URL can be a base")
            .pop_if_empty()
            .extend(path);

        debug!(%method, %url, "schema registry request");
        let mut request = self
            .inner
            .request(method, url)
            .header(reqwest::header::ACCEPT, CONTENT_TYPE);
        if let Some(auth) = &self.auth {
            request = request.basic_auth(&auth.username, auth.password.as_ref());
        }
        request
    }

    /// Gets the schema with the associated ID.
    pub async fn get_schema_by_id(&self, id: u32) -> Result<Schema, Error> {
        let req = self.make_request(Method::GET, &["schemas", "ids", &id.to_string()]);
        let res: GetByIdResponse = send_request(req).await?;
        Ok(Schema {
            id,
            raw: res.schema,
            schema_type: res.schema_type,
        })
    }

    /// Publishes a new schema for the specified subject and returns its ID.
    ///
    /// Publishing a schema that is identical to an existing version of the
    /// subject returns the existing ID. Compatibility checks are performed by
    /// the registry.
    pub async fn publish_schema(
        &self,
        subject: &str,
        schema: &str,
        schema_type: SchemaType,
        references: &[SchemaReference],
    ) -> Result<u32, Error> {
        let req = self.make_request(Method::POST, &["subjects", subject, "versions"]);
        let req = req.json(&SchemaRequest {
            schema,
            schema_type,
            references,
        });
        let res: PublishResponse = send_request(req).await?;
        Ok(res.id)
    }

    /// Checks whether `schema` has already been registered under `subject`,
    /// returning the matching version if so.
    pub async fn lookup_schema(
        &self,
        subject: &str,
        schema: &str,
        schema_type: SchemaType,
        references: &[SchemaReference],
    ) -> Result<Subject, Error> {
        let req = self.make_request(Method::POST, &["subjects", subject]);
        let req = req.json(&SchemaRequest {
            schema,
            schema_type,
            references,
        });
        let res: SubjectVersionResponse = send_request(req).await?;
        Ok(res.into())
    }

    /// Lists the versions registered under the specified subject, in
    /// ascending order.
    pub async fn list_subject_versions(&self, subject: &str) -> Result<Vec<i32>, Error> {
        let req = self.make_request(Method::GET, &["subjects", subject, "versions"]);
        send_request(req).await
    }

    /// Gets the specified version of a subject.
    pub async fn get_subject_version(&self, subject: &str, version: i32) -> Result<Subject, Error> {
        let req = self.make_request(
            Method::GET,
            &["subjects", subject, "versions", &version.to_string()],
        );
        let res: SubjectVersionResponse = send_request(req).await?;
        Ok(res.into())
    }

    /// Gets the latest version of a subject by listing its versions and
    /// fetching the highest.
    pub async fn get_latest_schema(&self, subject: &str) -> Result<Subject, Error> {
        let versions = self.list_subject_versions(subject).await?;
        let latest = latest_version(subject, &versions)?;
        self.get_subject_version(subject, latest).await
    }

    /// Gets the raw schema text of the specified version of a subject.
    pub async fn get_raw_schema(&self, subject: &str, version: i32) -> Result<String, Error> {
        let req = self.make_request(
            Method::GET,
            &["subjects", subject, "versions", &version.to_string(), "schema"],
        );
        let res = send_request_raw(req).await?;
        Ok(res.text().await?)
    }

    /// Lists the subject/version pairs that refer to the schema with the
    /// given ID.
    pub async fn list_versions_for_id(&self, id: u32) -> Result<Vec<SubjectVersion>, Error> {
        let req = self.make_request(
            Method::GET,
            &["schemas", "ids", &id.to_string(), "versions"],
        );
        send_request(req).await
    }

    /// Lists the schema types supported by the registry.
    pub async fn get_schema_types(&self) -> Result<Vec<String>, Error> {
        let req = self.make_request(Method::GET, &["schemas", "types"]);
        send_request(req).await
    }

    /// Lists all the subjects that the schema registry is aware of.
    pub async fn list_subjects(&self) -> Result<Vec<String>, Error> {
        let req = self.make_request(Method::GET, &["subjects"]);
        send_request(req).await
    }

    /// Deletes all schema versions associated with the specified subject,
    /// returning the deleted versions.
    ///
    /// A soft delete is performed unless `permanent` is set. The registry
    /// only accepts a permanent delete of a subject that was soft deleted
    /// first.
    pub async fn delete_subject(&self, subject: &str, permanent: bool) -> Result<Vec<i32>, Error> {
        let mut req = self.make_request(Method::DELETE, &["subjects", subject]);
        if permanent {
            req = req.query(&[("permanent", "true")]);
        }
        send_request(req).await
    }
}

/// The registry operations the encoding machinery depends on.
///
/// [`Client`] is the production implementation. Each method has the same
/// contract as the [`Client`] method of the same name.
#[async_trait]
pub trait Registry: fmt::Debug + Send + Sync {
    /// See [`Client::get_schema_by_id`].
    async fn get_schema_by_id(&self, id: u32) -> Result<Schema, Error>;

    /// See [`Client::publish_schema`].
    async fn publish_schema(
        &self,
        subject: &str,
        schema: &str,
        schema_type: SchemaType,
        references: &[SchemaReference],
    ) -> Result<u32, Error>;

    /// See [`Client::lookup_schema`].
    async fn lookup_schema(
        &self,
        subject: &str,
        schema: &str,
        schema_type: SchemaType,
        references: &[SchemaReference],
    ) -> Result<Subject, Error>;

    /// See [`Client::list_subject_versions`].
    async fn list_subject_versions(&self, subject: &str) -> Result<Vec<i32>, Error>;

    /// See [`Client::get_subject_version`].
    async fn get_subject_version(&self, subject: &str, version: i32) -> Result<Subject, Error>;

    /// See [`Client::get_latest_schema`].
    async fn get_latest_schema(&self, subject: &str) -> Result<Subject, Error> {
        let versions = self.list_subject_versions(subject).await?;
        let latest = latest_version(subject, &versions)?;
        self.get_subject_version(subject, latest).await
    }
}

#[async_trait]
impl Registry for Client {
    async fn get_schema_by_id(&self, id: u32) -> Result<Schema, Error> {
        Client::get_schema_by_id(self, id).await
    }

    async fn publish_schema(
        &self,
        subject: &str,
        schema: &str,
        schema_type: SchemaType,
        references: &[SchemaReference],
    ) -> Result<u32, Error> {
        Client::publish_schema(self, subject, schema, schema_type, references).await
    }

    async fn lookup_schema(
        &self,
        subject: &str,
        schema: &str,
        schema_type: SchemaType,
        references: &[SchemaReference],
    ) -> Result<Subject, Error> {
        Client::lookup_schema(self, subject, schema, schema_type, references).await
    }

    async fn list_subject_versions(&self, subject: &str) -> Result<Vec<i32>, Error> {
        Client::list_subject_versions(self, subject).await
    }

    async fn get_subject_version(&self, subject: &str, version: i32) -> Result<Subject, Error> {
        Client::get_subject_version(self, subject, version).await
    }

    async fn get_latest_schema(&self, subject: &str) -> Result<Subject, Error> {
        Client::get_latest_schema(self, subject).await
    }
}

fn latest_version(subject: &str, versions: &[i32]) -> Result<i32, Error> {
    versions
        .iter()
        .copied()
        .max()
        .ok_or_else(|| Error::InvalidResponse(format!("subject {subject} has no versions")))
}

async fn send_request<T>(req: reqwest::RequestBuilder) -> Result<T, Error>
where
    T: DeserializeOwned,
{
    let res = send_request_raw(req).await?;
    Ok(res.json().await?)
}

async fn send_request_raw(req: reqwest::RequestBuilder) -> Result<reqwest::Response, Error> {
    let res = req.send().await?;
    let status = res.status();
    if status.is_success() {
        Ok(res)
    } else {
        match res.json::<ErrorResponse>().await {
            Ok(err_res) => Err(Error::Server {
                code: err_res.error_code,
                message: err_res.message,
            }),
            Err(_) => Err(Error::undecodable(status)),
        }
    }
}

/// The kind of schema stored in the registry.
///
/// Registries omit the type for Avro schemas, so that is the default.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchemaType {
    #[default]
    Avro,
    Protobuf,
    Json,
}

impl SchemaType {
    fn name(&self) -> &'static str {
        match self {
            SchemaType::Avro => "AVRO",
            SchemaType::Protobuf => "PROTOBUF",
            SchemaType::Json => "JSON",
        }
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SchemaType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AVRO" => Ok(SchemaType::Avro),
            "PROTOBUF" => Ok(SchemaType::Protobuf),
            "JSON" => Ok(SchemaType::Json),
            _ => bail!("unknown schema type: {}", s),
        }
    }
}

/// A schema stored by a schema registry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Schema {
    /// The ID of the schema.
    pub id: u32,
    /// The raw text representing the schema.
    pub raw: String,
    /// The kind of schema.
    pub schema_type: SchemaType,
}

/// A subject stored by a schema registry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Subject {
    /// The latest schema in the subject.
    pub schema: Schema,
    /// The version of the schema.
    pub version: i32,
    /// The name of the schema.
    pub name: String,
}

/// A reference from one schema to another, by subject and version.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SchemaReference {
    /// The name the referencing schema uses for the referenced schema.
    pub name: String,
    /// The subject under which the referenced schema is registered.
    pub subject: String,
    /// The version of the referenced schema.
    pub version: i32,
}

/// A subject/version pair that refers to a schema.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct SubjectVersion {
    /// The name of the subject.
    pub subject: String,
    /// The version within the subject.
    pub version: i32,
}

#[derive(Debug, Serialize)]
struct SchemaRequest<'a> {
    schema: &'a str,
    #[serde(rename = "schemaType")]
    schema_type: SchemaType,
    references: &'a [SchemaReference],
}

#[derive(Debug, Deserialize)]
struct GetByIdResponse {
    schema: String,
    #[serde(rename = "schemaType", default)]
    schema_type: SchemaType,
}

#[derive(Debug, Deserialize)]
struct PublishResponse {
    id: u32,
}

#[derive(Debug, Deserialize)]
struct SubjectVersionResponse {
    subject: String,
    id: u32,
    version: i32,
    schema: String,
    #[serde(rename = "schemaType", default)]
    schema_type: SchemaType,
}

impl From<SubjectVersionResponse> for Subject {
    fn from(res: SubjectVersionResponse) -> Subject {
        Subject {
            schema: Schema {
                id: res.id,
                raw: res.schema,
                schema_type: res.schema_type,
            },
            version: res.version,
            name: res.subject,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error_code: i32,
    message: String,
}
