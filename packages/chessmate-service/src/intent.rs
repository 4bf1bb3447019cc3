use chessmate_chess::{OpeningCatalogue, contains_phrase, normalize};
use regex::Regex;
use serde::Serialize;

pub const DEFAULT_LIMIT: usize = 5;
pub const MAX_LIMIT: usize = 50;

const NUMERALS: &[(&str, usize)] = &[
	("one", 1),
	("two", 2),
	("three", 3),
	("four", 4),
	("five", 5),
	("six", 6),
	("seven", 7),
	("eight", 8),
	("nine", 9),
	("ten", 10),
	("eleven", 11),
	("twelve", 12),
	("thirteen", 13),
	("fourteen", 14),
	("fifteen", 15),
	("sixteen", 16),
	("seventeen", 17),
	("eighteen", 18),
	("nineteen", 19),
	("twenty", 20),
];

// (needle in normalized text, field, canonical value)
const PHASE_THEME_VOCABULARY: &[(&str, FilterField, &str)] = &[
	("opening", FilterField::Phase, "opening"),
	("middlegame", FilterField::Phase, "middlegame"),
	("endgame", FilterField::Phase, "endgame"),
	("ending", FilterField::Phase, "endgame"),
	("sacrifice", FilterField::Theme, "sacrifice"),
	("exchange sacrifice", FilterField::Theme, "exchange_sacrifice"),
	("king attack", FilterField::Theme, "king_attack"),
	("kingside attack", FilterField::Theme, "king_attack"),
	("attack on the king", FilterField::Theme, "king_attack"),
	("queenside majority", FilterField::Theme, "queenside_majority"),
	("pawn storm", FilterField::Theme, "pawn_storm"),
	("zugzwang", FilterField::Theme, "zugzwang"),
	("fortress", FilterField::Theme, "fortress"),
	("passed pawn", FilterField::Theme, "passed_pawn"),
];

const STOPWORDS: &[&str] = &[
	"a", "an", "and", "are", "at", "both", "find", "for", "game", "games", "give", "in", "is",
	"me", "of", "or", "over", "play", "played", "please", "points", "elo", "rated", "results",
	"show", "that", "the", "to", "top", "where", "which", "with", "within", "white", "black",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterField {
	Opening,
	EcoRange,
	Phase,
	Theme,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanFilter {
	pub field: FilterField,
	pub value: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RatingFilter {
	pub white_min: Option<u32>,
	pub black_min: Option<u32>,
	pub max_rating_delta: Option<u32>,
}

/// The analyzed question: pure data, no I/O behind it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
	pub cleaned_text: String,
	pub limit: usize,
	pub filters: Vec<PlanFilter>,
	pub rating: RatingFilter,
	pub keywords: Vec<String>,
}
impl Plan {
	pub fn opening_slugs(&self) -> Vec<String> {
		self.filters
			.iter()
			.filter(|filter| filter.field == FilterField::Opening)
			.map(|filter| filter.value.clone())
			.collect()
	}

	pub fn eco_ranges(&self) -> Vec<(String, String)> {
		self.filters
			.iter()
			.filter(|filter| filter.field == FilterField::EcoRange)
			.filter_map(|filter| {
				filter.value.split_once('-').map(|(a, b)| (a.to_string(), b.to_string()))
			})
			.collect()
	}

	pub fn phases(&self) -> Vec<&str> {
		self.filters
			.iter()
			.filter(|filter| filter.field == FilterField::Phase)
			.map(|filter| filter.value.as_str())
			.collect()
	}

	/// Canonical textual form: `analyse(plan.render(..))` preserves the
	/// filters and rating constraints. Also the agent cache's fingerprint
	/// input.
	pub fn render(&self, catalogue: &OpeningCatalogue) -> String {
		let mut parts = vec![format!("find {} games", self.limit)];

		for filter in &self.filters {
			match filter.field {
				FilterField::Opening => {
					if let Some(entry) = catalogue.entry(&filter.value)
						&& let Some(synonym) = entry.synonyms.first()
					{
						parts.push((*synonym).to_string());
					}
				},
				// Implied by the opening slug next to it.
				FilterField::EcoRange => {},
				FilterField::Phase | FilterField::Theme =>
					parts.push(filter.value.replace('_', " ")),
			}
		}
		if let Some(white_min) = self.rating.white_min {
			parts.push(format!("white is {white_min}"));
		}
		if let Some(black_min) = self.rating.black_min {
			parts.push(format!("black is {black_min}"));
		}
		if let Some(delta) = self.rating.max_rating_delta {
			parts.push(format!("within {delta} points"));
		}

		parts.extend(self.keywords.iter().cloned());

		parts.join(" ")
	}
}

/// Deterministic question analysis; no external calls.
pub fn analyse(catalogue: &OpeningCatalogue, text: &str) -> Plan {
	let cleaned_text = normalize(text);
	let limit = extract_limit(&cleaned_text);
	let mut filters = Vec::new();

	for hit in catalogue.filters_for_text(&cleaned_text) {
		filters.push(PlanFilter { field: FilterField::Opening, value: hit.slug.to_string() });
		filters.push(PlanFilter { field: FilterField::EcoRange, value: hit.eco.to_string() });
	}
	for (needle, field, value) in PHASE_THEME_VOCABULARY {
		let already = filters
			.iter()
			.any(|filter| filter.field == *field && filter.value == *value);

		if !already && contains_phrase(&cleaned_text, needle) {
			filters.push(PlanFilter { field: *field, value: (*value).to_string() });
		}
	}

	let rating = extract_rating(&cleaned_text);
	let keywords = extract_keywords(&cleaned_text);

	Plan { cleaned_text, limit, filters, rating, keywords }
}

/// `find/show/top/give N` with N a digit run or an English numeral; clamped
/// to `[1, 50]`, absent or zero falls back to 5.
fn extract_limit(text: &str) -> usize {
	let raw = capture(text, r"\b(?:find|show|top|give)\s+(?:me\s+)?(\d{1,4}|[a-z]+)\b");
	let value = raw.and_then(|raw| {
		raw.parse::<usize>().ok().or_else(|| {
			NUMERALS
				.iter()
				.find(|(numeral, _)| *numeral == raw)
				.map(|(_, value)| *value)
		})
	});

	match value {
		Some(0) | None => DEFAULT_LIMIT,
		Some(value) => value.min(MAX_LIMIT),
	}
}

fn extract_rating(text: &str) -> RatingFilter {
	let mut rating = RatingFilter::default();
	let both = capture_number(text, r"\bboth\s+(?:(?:is|are|at|over|above)\s+)?(\d{3,4})\b");

	if let Some(both) = both {
		rating.white_min = Some(both);
		rating.black_min = Some(both);
	}
	if let Some(white) =
		capture_number(text, r"\bwhite\s+(?:(?:is|at|over|above)\s+)?(\d{3,4})\b")
	{
		rating.white_min = Some(white);
	}
	if let Some(black) =
		capture_number(text, r"\bblack\s+(?:(?:is|at|over|above)\s+)?(\d{3,4})\b")
	{
		rating.black_min = Some(black);
	}
	if let Some(delta) = capture_number(text, r"\bwithin\s+(\d{1,4})\s+(?:points?|elo)\b")
		.or_else(|| capture_number(text, r"\b(\d{1,4})\s+points?\s+(?:lower|higher)\b"))
	{
		rating.max_rating_delta = Some(delta);
	}

	rating
}

/// Stopword-filtered residue, deduplicated, input order preserved.
fn extract_keywords(text: &str) -> Vec<String> {
	let mut keywords = Vec::new();

	for token in text.split_whitespace() {
		if token.chars().all(|c| c.is_ascii_digit()) {
			continue;
		}
		if STOPWORDS.contains(&token) || NUMERALS.iter().any(|(numeral, _)| *numeral == token) {
			continue;
		}
		if !keywords.iter().any(|existing| existing == token) {
			keywords.push(token.to_string());
		}
	}

	keywords
}

fn capture(text: &str, pattern: &str) -> Option<String> {
	let re = Regex::new(pattern).ok()?;

	re.captures(text).and_then(|caps| caps.get(1)).map(|m| m.as_str().to_string())
}

fn capture_number(text: &str, pattern: &str) -> Option<u32> {
	capture(text, pattern)?.parse().ok()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn catalogue() -> OpeningCatalogue {
		OpeningCatalogue::new()
	}

	#[test]
	fn parses_the_kings_indian_question() {
		let plan = analyse(
			&catalogue(),
			"Find 3 King's Indian games where white is 2500 and black within 100 points",
		);

		assert_eq!(plan.limit, 3);
		assert!(plan.filters.contains(&PlanFilter {
			field: FilterField::Opening,
			value: "kings_indian_defense".to_string(),
		}));
		assert!(plan.filters.contains(&PlanFilter {
			field: FilterField::EcoRange,
			value: "E60-E99".to_string(),
		}));
		assert_eq!(plan.rating.white_min, Some(2500));
		assert_eq!(plan.rating.max_rating_delta, Some(100));
	}

	#[test]
	fn limit_is_clamped_and_defaulted() {
		let catalogue = catalogue();

		assert_eq!(analyse(&catalogue, "sicilian crush").limit, DEFAULT_LIMIT);
		assert_eq!(analyse(&catalogue, "find 0 games").limit, DEFAULT_LIMIT);
		assert_eq!(analyse(&catalogue, "find 9999 games").limit, MAX_LIMIT);
		assert_eq!(analyse(&catalogue, "show twelve results").limit, 12);
		assert_eq!(analyse(&catalogue, "top 7 endgames").limit, 7);
	}

	#[test]
	fn both_rating_applies_to_both_colours() {
		let plan = analyse(&catalogue(), "games where both are 2700");

		assert_eq!(plan.rating.white_min, Some(2700));
		assert_eq!(plan.rating.black_min, Some(2700));
	}

	#[test]
	fn points_lower_phrase_sets_the_delta() {
		let plan = analyse(&catalogue(), "black 200 points lower than white");

		assert_eq!(plan.rating.max_rating_delta, Some(200));
	}

	#[test]
	fn phases_and_themes_come_from_the_vocabulary() {
		let plan = analyse(&catalogue(), "endgame fortress with a queenside majority");
		let values: Vec<_> =
			plan.filters.iter().map(|filter| filter.value.as_str()).collect();

		assert!(values.contains(&"endgame"));
		assert!(values.contains(&"fortress"));
		assert!(values.contains(&"queenside_majority"));
	}

	#[test]
	fn keywords_drop_stopwords_and_preserve_order() {
		let plan = analyse(&catalogue(), "find 3 games with brilliant rook endgame sacrifices");

		assert_eq!(plan.keywords, vec!["brilliant", "rook", "endgame", "sacrifices"]);
	}

	#[test]
	fn analyse_of_render_round_trips_filters_and_rating() {
		let catalogue = catalogue();

		for question in [
			"Find 3 King's Indian games where white is 2500 and black within 100 points",
			"show ten najdorf endgame games where both are 2600",
			"top 2 french games with a king attack",
		] {
			let plan = analyse(&catalogue, question);
			let round_tripped = analyse(&catalogue, &plan.render(&catalogue));
			let mut expected_filters = plan.filters.clone();
			let mut actual_filters = round_tripped.filters.clone();

			expected_filters.sort_by(|a, b| a.value.cmp(&b.value));
			actual_filters.sort_by(|a, b| a.value.cmp(&b.value));

			assert_eq!(actual_filters, expected_filters, "filters for {question:?}");
			assert_eq!(round_tripped.rating, plan.rating, "rating for {question:?}");
			assert_eq!(round_tripped.limit, plan.limit, "limit for {question:?}");
		}
	}
}
