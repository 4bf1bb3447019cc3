use time::{Date, OffsetDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
	Pending,
	InProgress,
	Completed,
	Failed,
}
impl JobStatus {
	pub const fn as_str(&self) -> &'static str {
		match self {
			Self::Pending => "pending",
			Self::InProgress => "in_progress",
			Self::Completed => "completed",
			Self::Failed => "failed",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"pending" => Some(Self::Pending),
			"in_progress" => Some(Self::InProgress),
			"completed" => Some(Self::Completed),
			"failed" => Some(Self::Failed),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EmbeddingJob {
	pub id: i64,
	pub position_id: i64,
	pub fen: String,
	pub status: String,
	pub attempts: i32,
	pub last_error: Option<String>,
	pub enqueued_at: OffsetDateTime,
	pub started_at: Option<OffsetDateTime>,
	pub completed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GameSummary {
	pub id: i64,
	pub white_name: String,
	pub black_name: String,
	pub white_rating: Option<i32>,
	pub black_rating: Option<i32>,
	pub event: Option<String>,
	pub played_on: Option<Date>,
	pub result: String,
	pub eco_code: Option<String>,
	pub opening_slug: Option<String>,
	pub opening_name: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GameDetail {
	pub id: i64,
	pub pgn: String,
}

#[derive(Debug)]
pub struct NewGame<'a> {
	pub white_id: i64,
	pub black_id: i64,
	pub event: Option<&'a str>,
	pub site: Option<&'a str>,
	pub round: Option<&'a str>,
	pub played_on: Option<Date>,
	pub result: &'a str,
	pub eco_code: Option<&'a str>,
	pub opening_slug: Option<&'a str>,
	pub opening_name: Option<&'a str>,
	pub white_rating: Option<i32>,
	pub black_rating: Option<i32>,
	pub pgn: &'a str,
}

#[derive(Debug)]
pub struct NewPosition<'a> {
	pub ply: i32,
	pub move_number: i32,
	pub side_to_move: &'a str,
	pub san: &'a str,
	pub fen: &'a str,
}

/// Joined position/game/player read backing one vector store point.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PositionPayloadRow {
	pub position_id: i64,
	pub game_id: i64,
	pub ply: i32,
	pub fen: String,
	pub white_name: String,
	pub black_name: String,
	pub white_elo: Option<i32>,
	pub black_elo: Option<i32>,
	pub opening_slug: Option<String>,
	pub eco_code: Option<String>,
	pub result: String,
}

/// Metadata predicates for `games::search_games`. Opening slugs and ECO
/// ranges form one disjunction; everything else is conjunctive.
#[derive(Debug, Clone, Default)]
pub struct GameQuery {
	pub opening_slugs: Vec<String>,
	pub eco_ranges: Vec<(String, String)>,
	pub result: Option<String>,
	pub white_min: Option<i32>,
	pub black_min: Option<i32>,
	pub max_rating_delta: Option<i32>,
	pub limit: i64,
}
impl GameQuery {
	/// Overfetch factor feeding the hybrid ranker.
	pub fn overfetch(&self) -> i64 {
		(self.limit * 10).max(50)
	}
}
