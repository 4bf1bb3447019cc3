#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Bad input: {0}")]
	BadInput(String),
	#[error("Embedding queue saturated: {pending} jobs pending; {games_stored} games committed")]
	QueueSaturated { pending: i64, games_stored: u64 },
	#[error(transparent)]
	Pgn(#[from] chessmate_chess::PgnError),
	#[error(transparent)]
	Storage(#[from] chessmate_storage::Error),
	#[error(transparent)]
	Embed(#[from] chessmate_providers::EmbedError),
	#[error("Unavailable: {0}")]
	Unavailable(String),
}
impl Error {
	/// User errors exit 1; infrastructure errors exit 2.
	pub fn is_user_error(&self) -> bool {
		matches!(self, Self::BadInput(_) | Self::QueueSaturated { .. } | Self::Pgn(_))
	}
}

pub type Result<T> = std::result::Result<T, Error>;
