//! # Peerbase Codec
//!
//! Object (de)serialization for Peerbase storage.
//!
//! Stored objects cross the storage boundary as opaque bytes. This crate
//! defines the [`Encode`]/[`Decode`] trait pair the storage layer is generic
//! over, plus two ready-made wire formats:
//!
//! - JSON ([`to_json`]/[`from_json`]) - the reference format
//! - CBOR ([`to_cbor`]/[`from_cbor`]) - compact binary alternative
//!
//! ## Usage
//!
//! ```
//! use peerbase_codec::{from_json, to_json, CodecResult, Decode, Encode};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct Profile {
//!     name: String,
//!     age: u32,
//! }
//!
//! impl Encode for Profile {
//!     fn to_bytes(&self) -> CodecResult<Vec<u8>> {
//!         to_json(self)
//!     }
//! }
//!
//! impl Decode for Profile {
//!     fn from_bytes(bytes: &[u8]) -> CodecResult<Self> {
//!         from_json(bytes)
//!     }
//! }
//!
//! let profile = Profile { name: "Alice".into(), age: 30 };
//! let bytes = profile.to_bytes().unwrap();
//! assert_eq!(Profile::from_bytes(&bytes).unwrap(), profile);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod error;
mod json;

pub use cbor::{from_cbor, to_cbor};
pub use error::{CodecError, CodecResult};
pub use json::{from_json, to_json};

/// Trait for types that can be encoded to stored bytes.
pub trait Encode {
    /// Encodes this value to bytes.
    ///
    /// The encoding should be deterministic for a given value so that
    /// stored payloads compare stably.
    fn to_bytes(&self) -> CodecResult<Vec<u8>>;
}

/// Trait for types that can be decoded from stored bytes.
pub trait Decode: Sized {
    /// Decodes a value from bytes previously produced by [`Encode::to_bytes`].
    fn from_bytes(bytes: &[u8]) -> CodecResult<Self>;
}

impl Encode for Vec<u8> {
    fn to_bytes(&self) -> CodecResult<Vec<u8>> {
        Ok(self.clone())
    }
}

impl Decode for Vec<u8> {
    fn from_bytes(bytes: &[u8]) -> CodecResult<Self> {
        Ok(bytes.to_vec())
    }
}

impl Encode for String {
    fn to_bytes(&self) -> CodecResult<Vec<u8>> {
        Ok(self.as_bytes().to_vec())
    }
}

impl Decode for String {
    fn from_bytes(bytes: &[u8]) -> CodecResult<Self> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| CodecError::invalid_payload(format!("invalid UTF-8: {e}")))
    }
}
