// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Stream metadata.
//!
//! A JSON document stored in `$$<stream>`; the latest record wins.
//! Reserved keys start with `$`, anything else is kept verbatim for callers.

use crate::error::Result;
use crate::types::id::EventNumber;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

fn is_false(v: &bool) -> bool {
    !*v
}

/// Role lists consulted by an access layer in front of the store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamAcl {
    #[serde(rename = "$r", default, skip_serializing_if = "Vec::is_empty")]
    pub read: Vec<String>,
    #[serde(rename = "$w", default, skip_serializing_if = "Vec::is_empty")]
    pub write: Vec<String>,
    #[serde(rename = "$d", default, skip_serializing_if = "Vec::is_empty")]
    pub delete: Vec<String>,
    #[serde(rename = "$mr", default, skip_serializing_if = "Vec::is_empty")]
    pub meta_read: Vec<String>,
    #[serde(rename = "$mw", default, skip_serializing_if = "Vec::is_empty")]
    pub meta_write: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamMetadata {
    /// Keep at most this many of the newest events.
    #[serde(rename = "$maxCount", default, skip_serializing_if = "Option::is_none")]
    pub max_count: Option<u64>,
    /// Hide events older than this many seconds.
    #[serde(rename = "$maxAge", default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<u64>,
    /// Events below this number are logically deleted.
    #[serde(rename = "$tb", default, skip_serializing_if = "Option::is_none")]
    pub truncate_before: Option<EventNumber>,
    /// Soft deletion marker.
    #[serde(rename = "$deleted", default, skip_serializing_if = "is_false")]
    pub deleted: bool,
    #[serde(rename = "$acl", default, skip_serializing_if = "Option::is_none")]
    pub acl: Option<StreamAcl>,
    #[serde(flatten)]
    pub custom: BTreeMap<String, Value>,
}

impl StreamMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_count(mut self, max_count: u64) -> Self {
        self.max_count = Some(max_count);
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age.as_secs());
        self
    }

    pub fn with_truncate_before(mut self, event_number: EventNumber) -> Self {
        self.truncate_before = Some(event_number);
        self
    }

    pub fn with_acl(mut self, acl: StreamAcl) -> Self {
        self.acl = Some(acl);
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: Value) -> Self {
        self.custom.insert(key.into(), value);
        self
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_json(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// A zero `$maxCount` would hide every event, including the one that
    /// keeps the stream's version.
    pub fn validate(&self) -> core::result::Result<(), &'static str> {
        if self.max_count == Some(0) {
            return Err("$maxCount must be at least 1");
        }
        if self.custom.keys().any(|k| k.starts_with('$')) {
            return Err("custom metadata keys must not start with '$'");
        }
        Ok(())
    }

    /// First event number readers may see, given the stream's last event.
    pub fn first_visible(&self, last: EventNumber) -> EventNumber {
        let mut first = self.truncate_before.unwrap_or_default();
        if let Some(max_count) = self.max_count {
            let by_count = (last.0 + 1).saturating_sub(max_count);
            first = first.max(EventNumber(by_count));
        }
        first
    }

    /// Whether an event stamped `timestamp_ms` has outlived `$maxAge`.
    pub fn is_expired(&self, timestamp_ms: i64, now_ms: i64) -> bool {
        match self.max_age {
            Some(secs) => now_ms.saturating_sub(timestamp_ms) > (secs as i64).saturating_mul(1000),
            None => false,
        }
    }
}
