use serde_json::Value;

/// A claimed index mutation. `payload` is schemaless; the worker validates
/// only the fields it consumes.
#[derive(Debug, sqlx::FromRow)]
pub struct OutboxJob {
	pub id: i64,
	pub op: String,
	pub aggregate_id: String,
	pub payload: Value,
	pub attempts: i32,
}

/// Recognized outbox operations. Anything else in the `op` column is a
/// permanent failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutboxOp {
	UpsertEntry,
	UpsertContext,
	DeleteEntry,
	DeleteContext,
	DeleteMemory,
	DeleteVault,
}
impl OutboxOp {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::UpsertEntry => "upsert_entry",
			Self::UpsertContext => "upsert_context",
			Self::DeleteEntry => "delete_entry",
			Self::DeleteContext => "delete_context",
			Self::DeleteMemory => "delete_memory",
			Self::DeleteVault => "delete_vault",
		}
	}

	pub fn parse(op: &str) -> Option<Self> {
		match op {
			"upsert_entry" => Some(Self::UpsertEntry),
			"upsert_context" => Some(Self::UpsertContext),
			"delete_entry" => Some(Self::DeleteEntry),
			"delete_context" => Some(Self::DeleteContext),
			"delete_memory" => Some(Self::DeleteMemory),
			"delete_vault" => Some(Self::DeleteVault),
			_ => None,
		}
	}
}
