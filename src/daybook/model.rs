//! # Domain Model
//!
//! This module defines the value types every backend trades in: [`Doc`], its
//! identifier [`DocId`], the display grouping [`DocType`] and the freshness
//! judgment [`SyncStatus`].
//!
//! ## Identity
//!
//! A [`DocId`] is opaque to the core. Backends choose the scheme:
//! - The file store derives it from the creation instant (Unix epoch seconds),
//!   so identifier → filename is a pure function.
//! - Remote sources use whatever key their API hands out.
//!
//! Two documents with the same id inside one backend are the same logical
//! document; the last write wins.
//!
//! ## Drafts vs Stored Documents
//!
//! `id` and `created` are optional so that callers can hand a draft to
//! `create_or_update` and let the backend assign both. Every document returned
//! by a backend has both set.
//!
//! ## Matching
//!
//! [`Doc::matches`] is the predicate the filtering backend applies. Terms are
//! separated by whitespace and all of them must match:
//!
//! | Term        | Matches when                                  |
//! |-------------|-----------------------------------------------|
//! | `#work`     | the document carries the tag `work`            |
//! | `mood:good` | the label `mood` has the value `good`          |
//! | `anything`  | the content contains `anything`                |
//!
//! Comparisons are case-insensitive.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Opaque document key, unique within one backend.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocId(String);

impl DocId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier scheme of the file store: creation time in epoch seconds.
    pub fn from_timestamp(created: DateTime<Utc>) -> Self {
        Self(created.timestamp().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Inverse of [`DocId::from_timestamp`], if this id follows that scheme.
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        let secs: i64 = self.0.parse().ok()?;
        Utc.timestamp_opt(secs, 0).single()
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DocId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<i64> for DocId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

// Hand-edited files write `id: 1625025715`, so numeric ids round-trip as
// YAML integers and both integers and strings are accepted on the way in.
impl Serialize for DocId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0.parse::<i64>() {
            Ok(n) if n.to_string() == self.0 => serializer.serialize_i64(n),
            _ => serializer.serialize_str(&self.0),
        }
    }
}

impl<'de> Deserialize<'de> for DocId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Int(i64),
            Str(String),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Int(n) => DocId::from(n),
            RawId::Str(s) => DocId::from(s),
        })
    }
}

/// What kind of content a backend holds. Fixed per backend, used for grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocType {
    Journal,
    Note,
    Event,
    Item,
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DocType::Journal => "journal",
            DocType::Note => "note",
            DocType::Event => "event",
            DocType::Item => "item",
        };
        f.write_str(name)
    }
}

/// Freshness and health of a backend's last refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SyncStatus {
    #[default]
    Uninitialized,
    Ok,
    Offline,
    Synchronizing,
    Error,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStatus::Uninitialized => "uninitialized",
            SyncStatus::Ok => "ok",
            SyncStatus::Offline => "offline",
            SyncStatus::Synchronizing => "synchronizing",
            SyncStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// One note, event or item.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Doc {
    pub id: Option<DocId>,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub trashed: Option<DateTime<Utc>>,
    pub content: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Doc {
    /// A draft: no id and no creation time until a backend stores it.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<DocId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = Some(created);
        self
    }

    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = Some(modified);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn is_trashed(&self) -> bool {
        self.trashed.is_some()
    }

    /// First non-empty line of the content, trimmed.
    pub fn title(&self) -> &str {
        self.content
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("")
    }

    /// Modified time, falling back to created time.
    pub fn recency(&self) -> Option<DateTime<Utc>> {
        self.modified.or(self.created)
    }

    /// See the module docs for the query syntax.
    pub fn matches(&self, query: &str) -> bool {
        let content = self.content.to_lowercase();
        query.split_whitespace().all(|term| {
            let term = term.to_lowercase();
            if let Some(tag) = term.strip_prefix('#').filter(|t| !t.is_empty()) {
                return self.tags.iter().any(|t| t.to_lowercase() == tag);
            }
            if let Some((key, value)) = term.split_once(':') {
                if !key.is_empty() {
                    let label = self
                        .labels
                        .iter()
                        .find(|(k, _)| k.to_lowercase() == key)
                        .map(|(_, v)| v.to_lowercase());
                    if label.as_deref() == Some(value) {
                        return true;
                    }
                }
            }
            content.contains(&term)
        })
    }
}

/// Stable sort, newest created first.
pub fn sort_newest_first(docs: &mut [Doc]) {
    docs.sort_by_key(|doc| Reverse(doc.created));
}

/// Stable sort by modified-or-created time, most recent first.
pub fn sort_by_recency(docs: &mut [Doc]) {
    docs.sort_by_key(|doc| Reverse(doc.recency()));
}
