//! Hybrid score blending.
//!
//! Dense and lexical result lists carry scores on incompatible scales, so
//! each list is min-max normalized to `[0, 1]` before the convex combination
//! `alpha * dense + (1 - alpha) * lexical`. A candidate present in only one
//! list contributes zero on the other component.

use std::collections::HashMap;

use serde_json::{Map, Value};
use time::OffsetDateTime;

/// One scored candidate after blending, carrying enough to order and to
/// build the outgoing hit.
#[derive(Clone, Debug)]
pub struct RankedObject {
	pub id: String,
	pub score: f32,
	pub ordering_time: Option<OffsetDateTime>,
	pub payload: Map<String, Value>,
}

pub fn min_max_normalize(scores: &mut [(String, f32)]) {
	if scores.is_empty() {
		return;
	}

	let min = scores.iter().map(|(_, score)| *score).fold(f32::INFINITY, f32::min);
	let max = scores.iter().map(|(_, score)| *score).fold(f32::NEG_INFINITY, f32::max);
	let range = max - min;

	if range.abs() < f32::EPSILON {
		for (_, score) in scores.iter_mut() {
			*score = 1.0;
		}
	} else {
		for (_, score) in scores.iter_mut() {
			*score = (*score - min) / range;
		}
	}
}

pub fn combine(
	mut dense: Vec<(String, f32)>,
	mut lexical: Vec<(String, f32)>,
	alpha: f32,
) -> HashMap<String, f32> {
	min_max_normalize(&mut dense);
	min_max_normalize(&mut lexical);

	let mut combined: HashMap<String, f32> = HashMap::with_capacity(dense.len() + lexical.len());

	for (id, score) in dense {
		*combined.entry(id).or_default() += alpha * score;
	}
	for (id, score) in lexical {
		*combined.entry(id).or_default() += (1.0 - alpha) * score;
	}
	for score in combined.values_mut() {
		*score = score.clamp(0.0, 1.0);
	}

	combined
}

/// Orders by descending score, then descending time (undated candidates
/// last), then ascending id.
pub fn sort_ranked(items: &mut [RankedObject]) {
	items.sort_by(|a, b| {
		b.score
			.total_cmp(&a.score)
			.then_with(|| b.ordering_time.cmp(&a.ordering_time))
			.then_with(|| a.id.cmp(&b.id))
	});
}
