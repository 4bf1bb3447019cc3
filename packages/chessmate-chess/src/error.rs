#[derive(Debug, thiserror::Error)]
pub enum PgnError {
	#[error("PGN stream is not valid UTF-8")]
	BadEncoding,
	#[error("Game has no moves")]
	NoMoves,
	#[error("Illegal move at ply {ply}: {san}")]
	IllegalMove { ply: u32, san: String },
	#[error("Invalid FEN header: {0}")]
	InvalidFen(String),
	#[error("Unterminated brace comment in movetext")]
	UnterminatedComment,
	#[error(transparent)]
	Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SanError {
	#[error("No legal move found for: {0}")]
	NoLegalMove(String),
	#[error("Ambiguous move: {0}")]
	Ambiguous(String),
	#[error("Invalid format: {0}")]
	InvalidFormat(String),
	#[error("Invalid promotion piece: {0}")]
	InvalidPromotion(char),
}
