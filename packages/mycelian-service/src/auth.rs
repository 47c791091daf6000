use std::collections::HashMap;

use crate::{BoxFuture, Error, Result};

#[derive(Clone, Debug)]
pub struct ActorInfo {
	pub actor_id: String,
}

/// Derives the acting identity from a bearer API key. The real authorizer
/// is an external collaborator; the static map below stands in for it.
pub trait Authorizer: Send + Sync {
	fn authorize<'a>(&'a self, api_key: &'a str) -> BoxFuture<'a, Result<ActorInfo>>;
}

pub struct StaticAuthorizer {
	api_keys: HashMap<String, String>,
}
impl StaticAuthorizer {
	pub fn new(cfg: &mycelian_config::Auth) -> Self {
		Self { api_keys: cfg.api_keys.clone() }
	}
}

impl Authorizer for StaticAuthorizer {
	fn authorize<'a>(&'a self, api_key: &'a str) -> BoxFuture<'a, Result<ActorInfo>> {
		Box::pin(async move {
			self.api_keys
				.get(api_key)
				.map(|actor_id| ActorInfo { actor_id: actor_id.clone() })
				.ok_or_else(|| Error::Unauthorized { message: "invalid API key".to_string() })
		})
	}
}
