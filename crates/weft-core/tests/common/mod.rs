// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(dead_code, clippy::unwrap_used)]

use std::sync::Arc;

use serde_json::Value;
use weft_core::constants::ROOT_TYPE;
use weft_core::{
    normalize_into_new_source, DataId, NormalizationPayload, NormalizeOptions, ResponseChunk,
    ResponseData, ResponseError, Selection, Selector, Variables,
};

/// Object literal as [`ResponseData`]; non-objects become an empty map.
pub fn obj(value: Value) -> ResponseData {
    match value {
        Value::Object(map) => map,
        _ => ResponseData::new(),
    }
}

/// Root chunk carrying `value`.
pub fn chunk(value: Value) -> ResponseChunk {
    ResponseChunk::data(obj(value))
}

/// Chunk with `data: null` and the given error messages.
pub fn error_chunk(messages: &[&str]) -> ResponseChunk {
    ResponseChunk {
        errors: Some(messages.iter().map(|m| ResponseError::new(*m)).collect()),
        ..ResponseChunk::default()
    }
}

/// Normalizes `data` against `selections` anchored at the root record.
pub fn normalize_root(
    selections: Vec<Selection>,
    data: Value,
    options: &NormalizeOptions,
) -> NormalizationPayload {
    normalize_root_with_errors(selections, data, options, None)
}

/// Like [`normalize_root`], with server errors.
pub fn normalize_root_with_errors(
    selections: Vec<Selection>,
    data: Value,
    options: &NormalizeOptions,
    errors: Option<&[ResponseError]>,
) -> NormalizationPayload {
    let selector = Selector::new(DataId::root(), Arc::from(selections), Variables::new());
    normalize_into_new_source(&selector, ROOT_TYPE, &obj(data), options, errors).unwrap()
}
