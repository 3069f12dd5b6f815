// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The Confluent wire format envelope.
//!
//! The first byte is a magic byte (0) that indicates the Confluent
//! serialization format version, and the next four bytes are a big endian
//! 32-bit schema ID. The remainder is the payload as encoded by the schema
//! engine.
//!
//! <https://docs.confluent.io/platform/current/schema-registry/fundamentals/serdes-develop/index.html#wire-format>

use byteorder::{BigEndian, ByteOrder, NetworkEndian, WriteBytesExt};

use crate::{Error, SchemaId};

/// The magic byte that begins every envelope.
pub const MAGIC: u8 = 0;

/// The length of the envelope header.
pub const HEADER_LEN: usize = 5;

/// Frames `payload` with a header naming `schema_id`.
pub fn encode_envelope(schema_id: SchemaId, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.write_u8(MAGIC).expect("writing to vec cannot fail");
    buf.write_u32::<NetworkEndian>(schema_id)
        .expect("writing to vec cannot fail");
    buf.extend_from_slice(payload);
    buf
}

/// Splits a framed message into its schema ID and payload.
///
/// The payload borrows from `bytes`.
pub fn decode_envelope(bytes: &[u8]) -> Result<(SchemaId, &[u8]), Error> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::MalformedEnvelope(format!(
            "expected at least {} bytes, got {}",
            HEADER_LEN,
            bytes.len()
        )));
    }
    let magic = bytes[0];
    if magic != MAGIC {
        return Err(Error::MalformedEnvelope(format!(
            "wrong magic byte: expected {}, got {}",
            MAGIC, magic
        )));
    }
    let schema_id = BigEndian::read_u32(&bytes[1..HEADER_LEN]);
    Ok((schema_id, &bytes[HEADER_LEN..]))
}
