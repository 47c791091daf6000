//! OpenAI-compatible embeddings client.

use std::time::Duration;

use reqwest::{
	Client,
	header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};
use mycelian_config::EmbeddingProviderConfig;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
	model: &'a str,
	input: &'a [String],
	dimensions: u32,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
	data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
	#[serde(default)]
	index: Option<usize>,
	embedding: Vec<f32>,
}

impl EmbeddingResponse {
	/// Providers may return items out of order. Each item lands in the slot
	/// named by its `index`, falling back to its position in `data`, and
	/// every vector must match the configured dimension.
	fn into_vectors(self, expected_count: usize, expected_dim: usize) -> Result<Vec<Vec<f32>>> {
		if self.data.len() != expected_count {
			return Err(Error::InvalidResponse {
				message: format!(
					"{} embeddings returned for {expected_count} inputs",
					self.data.len()
				),
			});
		}

		let mut slots: Vec<Option<Vec<f32>>> = (0..expected_count).map(|_| None).collect();

		for (position, item) in self.data.into_iter().enumerate() {
			let slot = item.index.unwrap_or(position);
			let Some(target) = slots.get_mut(slot) else {
				return Err(Error::InvalidResponse {
					message: format!("embedding index {slot} is out of range"),
				});
			};

			if target.is_some() {
				return Err(Error::InvalidResponse {
					message: format!("embedding index {slot} appears twice"),
				});
			}
			if item.embedding.len() != expected_dim {
				return Err(Error::InvalidResponse {
					message: format!(
						"embedding {slot} has dimension {}, expected {expected_dim}",
						item.embedding.len()
					),
				});
			}

			*target = Some(item.embedding);
		}

		// The count and duplicate checks above leave no way for a slot to
		// stay empty, but a hole must surface as an error, not a panic.
		slots
			.into_iter()
			.enumerate()
			.map(|(slot, vector)| {
				vector.ok_or_else(|| Error::InvalidResponse {
					message: format!("embedding index {slot} is missing"),
				})
			})
			.collect()
	}
}

pub struct EmbeddingClient {
	client: Client,
	endpoint: String,
	model: String,
	dimensions: u32,
}
impl EmbeddingClient {
	pub fn new(cfg: EmbeddingProviderConfig) -> Result<Self> {
		let client = Client::builder()
			.timeout(Duration::from_millis(cfg.timeout_ms))
			.default_headers(build_headers(&cfg)?)
			.build()?;

		Ok(Self {
			client,
			endpoint: format!("{}{}", cfg.api_base, cfg.path),
			model: cfg.model,
			dimensions: cfg.dimensions,
		})
	}

	pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
		let request =
			EmbeddingRequest { model: &self.model, input: texts, dimensions: self.dimensions };
		let response = self.client.post(&self.endpoint).json(&request).send().await?;
		let parsed: EmbeddingResponse = response.error_for_status()?.json().await?;

		parsed.into_vectors(texts.len(), self.dimensions as usize)
	}

	pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
		let vectors = self.embed(std::slice::from_ref(&text.to_string())).await?;

		vectors.into_iter().next().ok_or_else(|| Error::InvalidResponse {
			message: "no embedding returned for a single input".to_string(),
		})
	}
}

/// The bearer key and any extra headers from config are baked into the
/// client once at construction; every request then carries them.
fn build_headers(cfg: &EmbeddingProviderConfig) -> Result<HeaderMap> {
	let mut headers = HeaderMap::new();
	let mut bearer: HeaderValue =
		format!("Bearer {}", cfg.api_key).parse().map_err(|_| Error::InvalidConfig {
			message: "api_key contains characters not allowed in a header".to_string(),
		})?;

	bearer.set_sensitive(true);
	headers.insert(AUTHORIZATION, bearer);

	for (name, value) in &cfg.default_headers {
		let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| Error::InvalidConfig {
			message: format!("{name:?} is not a valid header name"),
		})?;
		let value: HeaderValue = value
			.as_str()
			.ok_or_else(|| Error::InvalidConfig {
				message: format!("header {name:?} must map to a string"),
			})?
			.parse()
			.map_err(|_| Error::InvalidConfig {
				message: format!("header {name:?} carries a value not allowed in a header"),
			})?;

		headers.insert(name, value);
	}

	Ok(headers)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn item(index: Option<usize>, embedding: Vec<f32>) -> EmbeddingItem {
		EmbeddingItem { index, embedding }
	}

	#[test]
	fn vectors_come_back_in_input_order() {
		let response = EmbeddingResponse {
			data: vec![item(Some(1), vec![2.0, 3.0]), item(Some(0), vec![0.5, 1.5])],
		};
		let vectors = response.into_vectors(2, 2).expect("expected vectors");

		assert_eq!(vectors, vec![vec![0.5, 1.5], vec![2.0, 3.0]]);
	}

	#[test]
	fn items_without_an_index_keep_their_position() {
		let response =
			EmbeddingResponse { data: vec![item(None, vec![1.0]), item(None, vec![2.0])] };
		let vectors = response.into_vectors(2, 1).expect("expected vectors");

		assert_eq!(vectors, vec![vec![1.0], vec![2.0]]);
	}

	#[test]
	fn count_mismatch_is_rejected() {
		let response = EmbeddingResponse { data: vec![item(None, vec![1.0])] };

		assert!(response.into_vectors(2, 1).is_err());
	}

	#[test]
	fn duplicate_and_out_of_range_indexes_are_rejected() {
		let duplicated =
			EmbeddingResponse { data: vec![item(Some(0), vec![1.0]), item(Some(0), vec![2.0])] };

		assert!(duplicated.into_vectors(2, 1).is_err());

		let out_of_range = EmbeddingResponse { data: vec![item(Some(5), vec![1.0])] };

		assert!(out_of_range.into_vectors(1, 1).is_err());
	}

	#[test]
	fn dimension_mismatch_is_rejected() {
		let response = EmbeddingResponse { data: vec![item(None, vec![1.0, 2.0])] };
		let err = response.into_vectors(1, 3).expect_err("expected dimension error");

		assert!(err.to_string().contains("dimension"));
	}

	#[test]
	fn build_headers_rejects_non_string_values() {
		let mut cfg = sample_cfg();

		cfg.default_headers.insert("x-org".to_string(), serde_json::json!(42));

		assert!(build_headers(&cfg).is_err());
	}

	#[test]
	fn build_headers_carries_config_headers() {
		let mut cfg = sample_cfg();

		cfg.default_headers
			.insert("x-org".to_string(), serde_json::Value::String("mycelian".to_string()));

		let headers = build_headers(&cfg).expect("expected headers");

		assert!(headers.get(AUTHORIZATION).expect("missing authorization").is_sensitive());
		assert_eq!(headers.get("x-org").and_then(|value| value.to_str().ok()), Some("mycelian"));
	}

	fn sample_cfg() -> EmbeddingProviderConfig {
		EmbeddingProviderConfig {
			provider_id: "test".to_string(),
			api_base: "http://127.0.0.1:1".to_string(),
			api_key: "test-key".to_string(),
			path: "/embeddings".to_string(),
			model: "test".to_string(),
			dimensions: 3,
			timeout_ms: 1_000,
			default_headers: serde_json::Map::new(),
		}
	}
}
