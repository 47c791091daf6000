pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Caller-facing errors. Dependency failures are deliberately opaque; the
/// underlying cause is logged where it happens, not surfaced to clients.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("{message}")]
	Validation { message: String },
	#[error("Unauthorized: {message}")]
	Unauthorized { message: String },
	#[error("embedding service unavailable")]
	EmbeddingUnavailable,
	#[error("search service unavailable")]
	SearchUnavailable,
	#[error("context search unavailable")]
	ContextSearchUnavailable,
	#[error("latest context unavailable")]
	LatestContextUnavailable,
}
