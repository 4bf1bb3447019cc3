#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("{0}")]
	Message(String),
}

pub type Result<T> = std::result::Result<T, Error>;
