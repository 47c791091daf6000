//! Index payload keys and field extraction.
//!
//! The outbox payload is schemaless; only the keys below are interpreted.
//! Everything else is stored and returned verbatim.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::{ContextHit, SearchHit};

pub const ACTOR_ID: &str = "actorId";
pub const VAULT_ID: &str = "vaultId";
pub const MEMORY_ID: &str = "memoryId";
pub const ENTRY_ID: &str = "entryId";
pub const CONTEXT_ID: &str = "contextId";
pub const SUMMARY: &str = "summary";
pub const RAW_ENTRY: &str = "rawEntry";
pub const CONTEXT: &str = "context";
pub const TAGS: &str = "tags";
pub const CREATION_TIME: &str = "creationTime";
pub const CONVERSATION_TIME: &str = "conversationTime";
pub const TIMESTAMP: &str = "timestamp";

pub fn string_field(payload: &Map<String, Value>, key: &str) -> Option<String> {
	payload.get(key).and_then(Value::as_str).map(str::to_string)
}

pub fn timestamp_field(payload: &Map<String, Value>, key: &str) -> Option<OffsetDateTime> {
	payload
		.get(key)
		.and_then(Value::as_str)
		.and_then(|raw| OffsetDateTime::parse(raw, &Rfc3339).ok())
}

pub fn tags_field(payload: &Map<String, Value>) -> Option<BTreeMap<String, String>> {
	let tags = payload.get(TAGS)?.as_object()?;
	let mut out = BTreeMap::new();

	for (key, value) in tags {
		if let Some(value) = value.as_str() {
			out.insert(key.clone(), value.to_string());
		}
	}

	Some(out)
}

/// The text an entry is matched against lexically. Mirrors the outbox
/// worker's embedding preference: summary first, then the raw entry.
pub fn entry_text(payload: &Map<String, Value>) -> Option<String> {
	[SUMMARY, RAW_ENTRY].iter().find_map(|key| {
		string_field(payload, key).filter(|value| !value.trim().is_empty())
	})
}

pub fn context_text(payload: &Map<String, Value>) -> Option<String> {
	string_field(payload, CONTEXT).filter(|value| !value.trim().is_empty())
}

pub fn entry_hit(
	fallback_id: &str,
	payload: &Map<String, Value>,
	score: f32,
	include_raw_entries: bool,
) -> SearchHit {
	SearchHit {
		entry_id: string_field(payload, ENTRY_ID).unwrap_or_else(|| fallback_id.to_string()),
		summary: string_field(payload, SUMMARY).unwrap_or_default(),
		raw_entry: if include_raw_entries { string_field(payload, RAW_ENTRY) } else { None },
		tags: tags_field(payload),
		creation_time: timestamp_field(payload, CREATION_TIME),
		conversation_time: timestamp_field(payload, CONVERSATION_TIME),
		score,
	}
}

/// Returns `None` for shards missing the context text or timestamp; such
/// points cannot be ranked and are dropped from results.
pub fn context_hit(payload: &Map<String, Value>, score: f32) -> Option<ContextHit> {
	let context = string_field(payload, CONTEXT)?;
	let timestamp = timestamp_field(payload, TIMESTAMP)?;

	Some(ContextHit { context, timestamp, score })
}
