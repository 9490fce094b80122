// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Credvault Contributors

//! Ciphertext wire format.
//!
//! An encrypted object is self-describing: its header carries the policy
//! id and full object id in the clear (parseable without decryption),
//! followed by the sealed key shares and the opaque ciphertext.
//!
//! Layout, all integers big-endian:
//!
//! ```text
//! magic (4) | version (1) | threshold (1) | share count (1)
//! policy id (32) | full object id (32) | content nonce (12)
//! per share: server id len (1) | server id | ephemeral key (33)
//!            | nonce (12) | ciphertext len (2) | ciphertext
//! content ciphertext len (4) | content ciphertext
//! ```

use super::sealing::SealedBox;
use super::servers::ServerId;
use super::ThresholdError;
use crate::models::{ObjectId, PolicyId};

/// Leading magic of every encrypted object.
pub const MAGIC: [u8; 4] = *b"CVLT";

/// Current wire format version.
pub const FORMAT_VERSION: u8 = 1;

/// Length of a compressed SEC1 public key.
const EPHEMERAL_KEY_LEN: usize = 33;

/// One key share sealed to a named key server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedShare {
    pub server_id: ServerId,
    pub sealed: SealedBox,
}

/// The clear header of an encrypted object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherHeader {
    pub policy_id: PolicyId,
    pub full_object_id: ObjectId,
    pub threshold: u8,
    pub nonce: [u8; 12],
    pub shares: Vec<SealedShare>,
}

/// A policy-bound ciphertext. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedObject {
    pub header: CipherHeader,
    pub ciphertext: Vec<u8>,
}

fn malformed(reason: &str) -> ThresholdError {
    ThresholdError::MalformedCiphertext(reason.to_string())
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ThresholdError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| malformed("truncated header"))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8, ThresholdError> {
        Ok(self.take(1)?[0])
    }

    fn take_u16(&mut self) -> Result<u16, ThresholdError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn take_u32(&mut self) -> Result<u32, ThresholdError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], ThresholdError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

impl EncryptedObject {
    /// Serialize to the wire form stored in the blob store.
    pub fn to_bytes(&self) -> Vec<u8> {
        let header = &self.header;
        let mut out = Vec::with_capacity(128 + self.ciphertext.len());
        out.extend_from_slice(&MAGIC);
        out.push(FORMAT_VERSION);
        out.push(header.threshold);
        out.push(header.shares.len() as u8);
        out.extend_from_slice(&header.policy_id.to_bytes());
        out.extend_from_slice(&header.full_object_id.to_bytes());
        out.extend_from_slice(&header.nonce);
        for share in &header.shares {
            let id = share.server_id.as_str().as_bytes();
            out.push(id.len() as u8);
            out.extend_from_slice(id);
            out.extend_from_slice(&share.sealed.ephemeral_key);
            out.extend_from_slice(&share.sealed.nonce);
            out.extend_from_slice(&(share.sealed.ciphertext.len() as u16).to_be_bytes());
            out.extend_from_slice(&share.sealed.ciphertext);
        }
        out.extend_from_slice(&(self.ciphertext.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse the wire form, failing fast on anything malformed. No
    /// network access and no key material involved.
    pub fn parse(bytes: &[u8]) -> Result<Self, ThresholdError> {
        if bytes.is_empty() {
            return Err(malformed("empty ciphertext"));
        }
        let mut reader = Reader::new(bytes);

        if reader.take_array::<4>()? != MAGIC {
            return Err(malformed("bad magic"));
        }
        let version = reader.take_u8()?;
        if version != FORMAT_VERSION {
            return Err(malformed("unsupported format version"));
        }
        let threshold = reader.take_u8()?;
        let share_count = reader.take_u8()?;
        if threshold == 0 || share_count == 0 || threshold > share_count {
            return Err(malformed("inconsistent threshold"));
        }
        let policy_id = PolicyId::from_bytes(reader.take_array::<32>()?);
        let full_object_id = ObjectId::from_bytes(reader.take_array::<32>()?);
        let nonce = reader.take_array::<12>()?;

        let mut shares = Vec::with_capacity(share_count as usize);
        for _ in 0..share_count {
            let id_len = reader.take_u8()? as usize;
            if id_len == 0 {
                return Err(malformed("empty server id"));
            }
            let id = std::str::from_utf8(reader.take(id_len)?)
                .map_err(|_| malformed("server id is not utf-8"))?;
            let ephemeral_key = reader.take(EPHEMERAL_KEY_LEN)?.to_vec();
            let share_nonce = reader.take_array::<12>()?;
            let ct_len = reader.take_u16()? as usize;
            let ciphertext = reader.take(ct_len)?.to_vec();
            shares.push(SealedShare {
                server_id: ServerId::new(id),
                sealed: SealedBox {
                    ephemeral_key,
                    nonce: share_nonce,
                    ciphertext,
                },
            });
        }

        let content_len = reader.take_u32()? as usize;
        let ciphertext = reader.take(content_len)?.to_vec();
        if reader.remaining() != 0 {
            return Err(malformed("trailing bytes after ciphertext"));
        }

        Ok(Self {
            header: CipherHeader {
                policy_id,
                full_object_id,
                threshold,
                nonce,
                shares,
            },
            ciphertext,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EncryptedObject {
        EncryptedObject {
            header: CipherHeader {
                policy_id: PolicyId::from_bytes([1u8; 32]),
                full_object_id: ObjectId::from_bytes([2u8; 32]),
                threshold: 2,
                nonce: [3u8; 12],
                shares: (0..3)
                    .map(|i| SealedShare {
                        server_id: ServerId::new(format!("server-{i}")),
                        sealed: SealedBox {
                            ephemeral_key: vec![4u8; 33],
                            nonce: [5u8; 12],
                            ciphertext: vec![6u8; 49],
                        },
                    })
                    .collect(),
            },
            ciphertext: vec![7u8; 100],
        }
    }

    #[test]
    fn wire_round_trip() {
        let object = sample();
        let parsed = EncryptedObject::parse(&object.to_bytes()).unwrap();
        assert_eq!(parsed, object);
    }

    #[test]
    fn header_is_parseable_without_keys() {
        let object = sample();
        let parsed = EncryptedObject::parse(&object.to_bytes()).unwrap();
        assert_eq!(parsed.header.policy_id, PolicyId::from_bytes([1u8; 32]));
        assert_eq!(
            parsed.header.full_object_id,
            ObjectId::from_bytes([2u8; 32])
        );
    }

    #[test]
    fn empty_input_fails_fast() {
        assert!(matches!(
            EncryptedObject::parse(&[]),
            Err(ThresholdError::MalformedCiphertext(reason)) if reason.contains("empty")
        ));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = sample().to_bytes();
        bytes[0] = b'X';
        assert!(matches!(
            EncryptedObject::parse(&bytes),
            Err(ThresholdError::MalformedCiphertext(reason)) if reason.contains("magic")
        ));
    }

    #[test]
    fn truncation_is_rejected() {
        let bytes = sample().to_bytes();
        for len in [3, 10, 40, bytes.len() - 1] {
            assert!(
                EncryptedObject::parse(&bytes[..len]).is_err(),
                "truncation at {len} must fail"
            );
        }
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = sample().to_bytes();
        bytes.push(0);
        assert!(matches!(
            EncryptedObject::parse(&bytes),
            Err(ThresholdError::MalformedCiphertext(reason)) if reason.contains("trailing")
        ));
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let mut object = sample();
        object.header.threshold = 0;
        assert!(EncryptedObject::parse(&object.to_bytes()).is_err());
    }
}
