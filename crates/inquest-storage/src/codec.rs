//! Typed codecs for stored keys and values.
//!
//! Every stored shape names its codec at compile time through [`Storable`];
//! there is no runtime type lookup. Raw byte payloads use [`Raw`] and are
//! written verbatim, so an already serialized document is never encoded twice.

use std::borrow::Cow;

use inquest_core::{BossToName, DpsLog, FolderToBoss, JsonLog, LogIdentity, StoredLogs};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{StoreError, StoreResult};

/// Encodes and decodes values of type `T`.
pub trait Codec<T> {
    fn encode(value: &T) -> StoreResult<Cow<'_, [u8]>>;
    fn decode(bytes: &[u8]) -> StoreResult<T>;
}

/// A value that can be stored, bound to exactly one codec.
pub trait Storable: Sized {
    type Codec: Codec<Self>;

    fn encode(&self) -> StoreResult<Cow<'_, [u8]>> {
        <Self::Codec as Codec<Self>>::encode(self)
    }

    fn decode(bytes: &[u8]) -> StoreResult<Self> {
        <Self::Codec as Codec<Self>>::decode(bytes)
    }
}

/// Key encoding. Keys are stored as their UTF-8 (or raw) bytes so the sled
/// ordering matches the textual ordering of identities.
pub trait StoreKey {
    fn key_bytes(&self) -> Cow<'_, [u8]>;
}

// ============================================================================
// Codecs
// ============================================================================

/// Compact binary encoding for small, fixed-shape records.
pub struct Bincode;

impl<T: Serialize + DeserializeOwned> Codec<T> for Bincode {
    fn encode(value: &T) -> StoreResult<Cow<'_, [u8]>> {
        bincode::serialize(value)
            .map(Cow::Owned)
            .map_err(StoreError::serialization::<T>)
    }

    fn decode(bytes: &[u8]) -> StoreResult<T> {
        bincode::deserialize(bytes).map_err(StoreError::deserialization::<T>)
    }
}

/// JSON encoding for documents whose source format is JSON.
pub struct Json;

impl<T: Serialize + DeserializeOwned> Codec<T> for Json {
    fn encode(value: &T) -> StoreResult<Cow<'_, [u8]>> {
        serde_json::to_vec(value)
            .map(Cow::Owned)
            .map_err(StoreError::serialization::<T>)
    }

    fn decode(bytes: &[u8]) -> StoreResult<T> {
        serde_json::from_slice(bytes).map_err(StoreError::deserialization::<T>)
    }
}

/// Verbatim bytes.
pub struct Raw;

impl Codec<Vec<u8>> for Raw {
    fn encode(value: &Vec<u8>) -> StoreResult<Cow<'_, [u8]>> {
        Ok(Cow::Borrowed(value.as_slice()))
    }

    fn decode(bytes: &[u8]) -> StoreResult<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

/// Verbatim UTF-8 text.
pub struct Utf8;

impl Codec<String> for Utf8 {
    fn encode(value: &String) -> StoreResult<Cow<'_, [u8]>> {
        Ok(Cow::Borrowed(value.as_bytes()))
    }

    fn decode(bytes: &[u8]) -> StoreResult<String> {
        String::from_utf8(bytes.to_vec()).map_err(StoreError::deserialization::<String>)
    }
}

impl Codec<LogIdentity> for Utf8 {
    fn encode(value: &LogIdentity) -> StoreResult<Cow<'_, [u8]>> {
        Ok(Cow::Borrowed(value.as_str().as_bytes()))
    }

    fn decode(bytes: &[u8]) -> StoreResult<LogIdentity> {
        <Utf8 as Codec<String>>::decode(bytes).map(LogIdentity::new)
    }
}

// ============================================================================
// Registry
// ============================================================================

macro_rules! storable {
    ($codec:ty => $($ty:ty),+ $(,)?) => {
        $(impl Storable for $ty {
            type Codec = $codec;
        })+
    };
}

storable!(Bincode => StoredLogs, FolderToBoss, BossToName, DpsLog, u64, i64, bool);
storable!(Json => JsonLog);
storable!(Raw => Vec<u8>);
storable!(Utf8 => String, LogIdentity);

impl StoreKey for str {
    fn key_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.as_bytes())
    }
}

impl StoreKey for String {
    fn key_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.as_bytes())
    }
}

impl StoreKey for LogIdentity {
    fn key_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.as_str().as_bytes())
    }
}

impl StoreKey for [u8] {
    fn key_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self)
    }
}

impl StoreKey for Vec<u8> {
    fn key_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.as_slice())
    }
}
