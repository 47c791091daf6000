pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Http(#[from] reqwest::Error),
	#[error("Invalid provider configuration: {message}")]
	InvalidConfig { message: String },
	#[error("Malformed embedding response: {message}")]
	InvalidResponse { message: String },
}
