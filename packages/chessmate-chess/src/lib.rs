mod error;
mod openings;
mod pgn;
mod san;

pub use error::{PgnError, SanError};
pub use openings::{
	EcoCode, EcoRange, OpeningCatalogue, OpeningEntry, OpeningFilter, contains_phrase, normalize,
};
pub use pgn::{
	GameResult, GameStream, ParsedGame, PositionSnapshot, PrecheckIssue, RawGame, Side, parse_game,
	precheck_game,
};
pub use san::resolve_san;
