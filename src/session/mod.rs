// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Credvault Contributors

//! Session key management.
//!
//! A session key is a short-lived, address-bound credential that proves
//! caller identity to key servers without re-signing per server. This
//! module owns its full lifecycle: creation, the signing challenge,
//! verification, serialization, and TTL-bounded reuse.

mod cache;
mod error;
mod key;
mod signer;

pub use cache::SessionKeyCache;
pub use error::{SessionError, SignerError};
pub use key::{SessionKey, SessionToken, MAX_TTL_MINUTES};
pub use signer::{recover_address, IdentitySigner, LocalSigner};
