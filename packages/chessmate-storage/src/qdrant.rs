use std::{collections::HashMap, time::Duration};

use qdrant_client::{
	Payload,
	Qdrant,
	qdrant::{
		Condition, CreateCollectionBuilder, Distance, Filter, PointStruct, Query,
		QueryPointsBuilder, Range, ScoredPoint, UpsertPointsBuilder, Value, VectorParamsBuilder,
		point_id::PointIdOptions, value::Kind,
	},
};

use crate::{Error, Result, models::PositionPayloadRow};

pub struct VectorStore {
	pub client: Qdrant,
	pub collection: String,
	pub vector_dim: u32,
}
impl VectorStore {
	pub fn new(cfg: &chessmate_config::Qdrant) -> Result<Self> {
		let client = Qdrant::from_url(&cfg.url)
			.timeout(Duration::from_millis(cfg.timeout_ms))
			.build()?;

		Ok(Self {
			client,
			collection: cfg.collection.clone(),
			vector_dim: cfg.vector_dim,
		})
	}

	pub async fn ensure_collection(&self) -> Result<()> {
		if self.client.collection_exists(&self.collection).await? {
			return Ok(());
		}

		self.client
			.create_collection(
				CreateCollectionBuilder::new(&self.collection).vectors_config(
					VectorParamsBuilder::new(u64::from(self.vector_dim), Distance::Cosine),
				),
			)
			.await?;

		Ok(())
	}

	/// Idempotent by construction: the id is a deterministic hash of the
	/// FEN, so re-embedding a position overwrites the same point.
	pub async fn upsert_point(
		&self,
		id: u64,
		vector: Vec<f32>,
		payload: &PositionPayloadRow,
	) -> Result<()> {
		let point = PointStruct::new(id, vector, position_payload(payload));
		let upsert = UpsertPointsBuilder::new(self.collection.clone(), vec![point]).wait(true);

		self.client.upsert_points(upsert).await?;

		Ok(())
	}

	/// Filtered k-NN search. Transport failures come back as `Unavailable`
	/// so the query pipeline can degrade instead of failing.
	pub async fn search(
		&self,
		vector: Vec<f32>,
		filter: &SearchFilter,
		limit: u64,
	) -> Result<Vec<VectorHit>> {
		let query = QueryPointsBuilder::new(self.collection.clone())
			.query(Query::new_nearest(vector))
			.filter(filter.to_qdrant())
			.with_payload(true)
			.limit(limit);
		let response = self
			.client
			.query(query)
			.await
			.map_err(|err| Error::VectorUnavailable(err.to_string()))?;

		Ok(response.result.iter().filter_map(decode_hit).collect())
	}
}

/// Conjunction of payload predicates; several opening slugs are a
/// disjunction nested inside it.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
	pub opening_slugs: Vec<String>,
	pub result: Option<String>,
	pub white_elo_min: Option<i32>,
	pub black_elo_min: Option<i32>,
	pub ply_range: Option<(i32, i32)>,
}
impl SearchFilter {
	fn to_qdrant(&self) -> Filter {
		let mut must = Vec::new();

		if !self.opening_slugs.is_empty() {
			let slugs = self
				.opening_slugs
				.iter()
				.map(|slug| Condition::matches("opening_slug", slug.clone()))
				.collect::<Vec<_>>();

			must.push(Condition::from(Filter { should: slugs, ..Default::default() }));
		}
		if let Some(result) = &self.result {
			must.push(Condition::matches("result", result.clone()));
		}
		if let Some(min) = self.white_elo_min {
			must.push(Condition::range(
				"white_elo",
				Range { gte: Some(f64::from(min)), ..Default::default() },
			));
		}
		if let Some(min) = self.black_elo_min {
			must.push(Condition::range(
				"black_elo",
				Range { gte: Some(f64::from(min)), ..Default::default() },
			));
		}
		if let Some((low, high)) = self.ply_range {
			must.push(Condition::range(
				"ply",
				Range {
					gte: Some(f64::from(low)),
					lte: Some(f64::from(high)),
					..Default::default()
				},
			));
		}

		Filter { must, ..Default::default() }
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
	pub id: u64,
	pub score: f32,
	pub game_id: i64,
}

fn position_payload(row: &PositionPayloadRow) -> Payload {
	let mut map = HashMap::new();

	map.insert("game_id".to_string(), Value::from(row.game_id));
	map.insert("white_name".to_string(), Value::from(row.white_name.clone()));
	map.insert("black_name".to_string(), Value::from(row.black_name.clone()));
	map.insert("white_elo".to_string(), optional_int(row.white_elo));
	map.insert("black_elo".to_string(), optional_int(row.black_elo));
	map.insert("opening_slug".to_string(), optional_text(row.opening_slug.as_deref()));
	map.insert("eco_code".to_string(), optional_text(row.eco_code.as_deref()));
	map.insert("ply".to_string(), Value::from(i64::from(row.ply)));
	map.insert("result".to_string(), Value::from(row.result.clone()));

	Payload::from(map)
}

fn optional_int(value: Option<i32>) -> Value {
	match value {
		Some(value) => Value::from(i64::from(value)),
		None => Value { kind: Some(Kind::NullValue(0)) },
	}
}

fn optional_text(value: Option<&str>) -> Value {
	match value {
		Some(value) => Value::from(value.to_string()),
		None => Value { kind: Some(Kind::NullValue(0)) },
	}
}

fn decode_hit(point: &ScoredPoint) -> Option<VectorHit> {
	let id = match point.id.as_ref()?.point_id_options.as_ref()? {
		PointIdOptions::Num(num) => *num,
		PointIdOptions::Uuid(_) => return None,
	};
	let game_id = payload_i64(&point.payload, "game_id")?;

	Some(VectorHit { id, score: point.score, game_id })
}

fn payload_i64(payload: &HashMap<String, Value>, key: &str) -> Option<i64> {
	match payload.get(key)?.kind.as_ref()? {
		Kind::IntegerValue(value) => Some(*value),
		Kind::DoubleValue(value) if value.fract() == 0.0 => Some(*value as i64),
		_ => None,
	}
}

/// FNV-1a over the canonical FEN; identical positions across games share one
/// point.
pub fn stable_point_id(fen: &str) -> u64 {
	const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
	const PRIME: u64 = 0x0000_0100_0000_01b3;

	let mut hash = OFFSET_BASIS;

	for byte in fen.bytes() {
		hash ^= u64::from(byte);
		hash = hash.wrapping_mul(PRIME);
	}

	hash
}

/// The opaque form stored on `positions.vector_id`.
pub fn vector_id_string(point_id: u64) -> String {
	format!("{point_id:016x}")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn point_ids_are_stable_and_fen_sensitive() {
		let start = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
		let after_e4 = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPPPPPP/RNBQKBNR b KQkq - 0 1";

		assert_eq!(stable_point_id(start), stable_point_id(start));
		assert_ne!(stable_point_id(start), stable_point_id(after_e4));
		// Known FNV-1a vector: the empty input hashes to the offset basis.
		assert_eq!(stable_point_id(""), 0xcbf2_9ce4_8422_2325);
	}

	#[test]
	fn vector_id_is_fixed_width_hex() {
		let id = vector_id_string(stable_point_id("8/8/8/8/8/8/8/8 w - - 0 1"));

		assert_eq!(id.len(), 16);
		assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
	}
}
