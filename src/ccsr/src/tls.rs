// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! TLS certificates and identities.

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// A [Serde][serde]-enabled wrapper around [`reqwest::Identity`].
///
/// [Serde]: serde
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pem: Vec<u8>,
}

impl Identity {
    /// Constructs an identity from a PEM-formatted key and certificate.
    ///
    /// The key must be an unencrypted PKCS#8 or RSA private key.
    pub fn from_pem(key: &[u8], cert: &[u8]) -> Result<Self, anyhow::Error> {
        let mut pem = Vec::with_capacity(key.len() + cert.len() + 1);
        pem.extend_from_slice(key);
        if !key.ends_with(b"\n") {
            pem.push(b'\n');
        }
        pem.extend_from_slice(cert);
        let _ = reqwest::Identity::from_pem(&pem).context("parsing TLS identity")?;
        Ok(Identity { pem })
    }
}

impl From<Identity> for reqwest::Identity {
    fn from(id: Identity) -> Self {
        reqwest::Identity::from_pem(&id.pem).expect("known to be a valid identity")
    }
}

/// A [Serde][serde]-enabled wrapper around [`reqwest::Certificate`].
///
/// [Serde]: serde
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    der: Vec<u8>,
}

impl Certificate {
    /// Parses a DER-formatted X509 certificate.
    pub fn from_der(der: &[u8]) -> Result<Certificate, anyhow::Error> {
        let _ = reqwest::Certificate::from_der(der).context("parsing DER certificate")?;
        Ok(Certificate { der: der.into() })
    }

    /// Parses a PEM-formatted X509 certificate.
    pub fn from_pem(pem: &[u8]) -> Result<Certificate, anyhow::Error> {
        let mut certs = reqwest::Certificate::from_pem_bundle(pem)
            .context("parsing PEM certificate")?
            .into_iter();
        match (certs.next(), certs.next()) {
            (Some(_), None) => {}
            (None, _) => anyhow::bail!("PEM input contains no certificates"),
            (Some(_), Some(_)) => anyhow::bail!("PEM input contains more than one certificate"),
        }
        let der = pem_to_der(pem)?;
        Ok(Certificate { der })
    }
}

impl From<Certificate> for reqwest::Certificate {
    fn from(cert: Certificate) -> Self {
        reqwest::Certificate::from_der(&cert.der).expect("known to be a valid cert")
    }
}

/// Extracts the DER body of the first `CERTIFICATE` block in `pem`.
fn pem_to_der(pem: &[u8]) -> Result<Vec<u8>, anyhow::Error> {
    use base64::Engine;

    let text = std::str::from_utf8(pem).context("PEM input is not UTF-8")?;
    let mut lines = text
        .lines()
        .skip_while(|line| !line.starts_with("-----BEGIN CERTIFICATE-----"));
    if lines.next().is_none() {
        anyhow::bail!("PEM input contains no certificates");
    }
    let body: String = lines
        .take_while(|line| !line.starts_with("-----END CERTIFICATE-----"))
        .map(str::trim)
        .collect();
    base64::engine::general_purpose::STANDARD
        .decode(body)
        .context("decoding PEM certificate body")
}
