//! JSON<->IVec helpers for sled trees.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{StoreError, StoreResult};

pub fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

pub fn decode_ivec<T: DeserializeOwned>(ivec: &sled::IVec) -> StoreResult<T> {
    decode(ivec.as_ref())
}

pub fn require<T>(value: Option<T>, what: &str) -> StoreResult<T> {
    value.ok_or_else(|| StoreError::NotFound(what.to_string()))
}
