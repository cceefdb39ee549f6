//! # On-Disk Format
//!
//! Every journal file is three segments joined by `---` delimiters:
//!
//! ```text
//! ---
//! id: 1625025715
//! created: 2021-06-30T04:01:55Z
//! tags:
//! - travel
//! ---
//! Body text, verbatim.
//! ```
//!
//! Decoding splits on `---` with at most three pieces. The first piece must
//! be blank, the second is YAML metadata, the third is the body. Anything
//! else is a parse error, so a `---` inside the body is harmless while a
//! missing metadata block is not.
//!
//! The body is written followed by a single `\n`, and the newline that
//! follows the closing delimiter belongs to the format, not the body.
//! Decoding strips exactly those two, so `decode(encode(doc))` returns the
//! content unchanged.

use crate::error::{DaybookError, Result};
use crate::model::{Doc, DocId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const DELIMITER: &str = "---";

#[derive(Debug, Serialize, Deserialize)]
struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<DocId>,
    #[serde(default)]
    created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    trashed: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    labels: BTreeMap<String, String>,
}

/// The YAML metadata block, ending in a newline.
pub fn encode_metadata(doc: &Doc) -> Result<String> {
    check_metadata(doc)?;
    let meta = Metadata {
        id: doc.id.clone(),
        created: doc.created,
        modified: doc.modified,
        trashed: doc.trashed,
        tags: doc.tags.clone(),
        labels: doc.labels.clone(),
    };
    let mut yaml = serde_yaml::to_string(&meta)?;
    if !yaml.ends_with('\n') {
        yaml.push('\n');
    }
    Ok(yaml)
}

/// Metadata strings must not contain the delimiter, or the block would be
/// cut short on the way back in.
fn check_metadata(doc: &Doc) -> Result<()> {
    let id = doc.id.as_ref().map(|id| id.as_str());
    let labels = doc.labels.iter().flat_map(|(k, v)| [k.as_str(), v.as_str()]);
    let offending = id
        .into_iter()
        .chain(doc.tags.iter().map(String::as_str))
        .chain(labels)
        .find(|value| value.contains(DELIMITER));
    match offending {
        Some(value) => Err(DaybookError::Validation(format!(
            "metadata value {:?} contains `{}`",
            value, DELIMITER
        ))),
        None => Ok(()),
    }
}

/// The complete file contents for `doc`.
pub fn encode(doc: &Doc) -> Result<String> {
    let metadata = encode_metadata(doc)?;
    Ok(format!(
        "{d}\n{metadata}{d}\n{body}\n",
        d = DELIMITER,
        body = doc.content
    ))
}

/// Parse file contents. Requires `created` in the metadata; a missing `id`
/// is derived from it.
pub fn decode(raw: &str) -> Result<Doc> {
    let segments: Vec<&str> = raw.splitn(3, DELIMITER).collect();
    if segments.len() != 3 || !segments[0].trim().is_empty() {
        return Err(DaybookError::Parse(
            "unable to find metadata section".to_string(),
        ));
    }

    if segments[1].trim().is_empty() {
        return Err(DaybookError::Validation(
            "metadata section is empty".to_string(),
        ));
    }
    let meta: Metadata = serde_yaml::from_str(segments[1])?;

    let created = meta.created.ok_or_else(|| {
        DaybookError::Validation("metadata is missing `created`".to_string())
    })?;
    let id = meta.id.unwrap_or_else(|| DocId::from_timestamp(created));

    let body = segments[2];
    // Hand-edited files may use CRLF line endings.
    let body = body
        .strip_prefix("\r\n")
        .or_else(|| body.strip_prefix('\n'))
        .unwrap_or(body);
    let body = body
        .strip_suffix("\r\n")
        .or_else(|| body.strip_suffix('\n'))
        .unwrap_or(body);

    Ok(Doc {
        id: Some(id),
        created: Some(created),
        modified: meta.modified,
        trashed: meta.trashed,
        content: body.to_string(),
        tags: meta.tags,
        labels: meta.labels,
    })
}
