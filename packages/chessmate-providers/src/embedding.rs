use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
	#[error("OPENAI_API_KEY is not set")]
	MissingCredentials,
	#[error("Embedding batch exceeds {0} inputs")]
	BatchTooLarge(usize),
	#[error("Embedding request failed: {0}")]
	Transport(String),
	#[error("Embedder rate limited; retry_after={retry_after_secs:?}")]
	RateLimited { retry_after_secs: Option<u64> },
	#[error("Embedder rejected the request: {0}")]
	Rejected(String),
	#[error("Malformed embedding response: {0}")]
	Malformed(String),
}

/// One batched embedding call; vectors come back in input order.
pub async fn embed(
	cfg: &chessmate_config::Embedding,
	inputs: &[String],
) -> Result<Vec<Vec<f32>>, EmbedError> {
	let Some(api_key) = cfg.api_key.as_deref() else {
		return Err(EmbedError::MissingCredentials);
	};

	if inputs.len() > cfg.batch_size {
		return Err(EmbedError::BatchTooLarge(cfg.batch_size));
	}

	let client = Client::builder()
		.timeout(Duration::from_millis(cfg.timeout_ms))
		.build()
		.map_err(|err| EmbedError::Transport(err.to_string()))?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({
		"model": cfg.model,
		"input": inputs,
		"dimensions": cfg.dimensions,
	});
	let res = client
		.post(url)
		.bearer_auth(api_key)
		.json(&body)
		.send()
		.await
		.map_err(|err| EmbedError::Transport(err.to_string()))?;
	let status = res.status();

	if status == StatusCode::TOO_MANY_REQUESTS {
		let retry_after_secs = res
			.headers()
			.get("retry-after")
			.and_then(|value| value.to_str().ok())
			.and_then(|value| value.parse().ok());

		return Err(EmbedError::RateLimited { retry_after_secs });
	}
	if status.is_server_error() {
		return Err(EmbedError::Transport(format!("embedder returned {status}")));
	}
	if !status.is_success() {
		return Err(EmbedError::Rejected(format!("embedder returned {status}")));
	}

	let json: Value =
		res.json().await.map_err(|err| EmbedError::Malformed(err.to_string()))?;
	let vectors = parse_embedding_response(json)?;

	if vectors.len() != inputs.len() {
		return Err(EmbedError::Malformed(format!(
			"expected {} vectors, got {}",
			inputs.len(),
			vectors.len()
		)));
	}

	Ok(vectors)
}

fn parse_embedding_response(json: Value) -> Result<Vec<Vec<f32>>, EmbedError> {
	let data = json
		.get("data")
		.and_then(|v| v.as_array())
		.ok_or_else(|| EmbedError::Malformed("response is missing data array".to_string()))?;
	let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());

	for (fallback_index, item) in data.iter().enumerate() {
		let index = item
			.get("index")
			.and_then(|v| v.as_u64())
			.map(|v| v as usize)
			.unwrap_or(fallback_index);
		let embedding = item
			.get("embedding")
			.and_then(|v| v.as_array())
			.ok_or_else(|| EmbedError::Malformed("item missing embedding array".to_string()))?;
		let mut vec = Vec::with_capacity(embedding.len());

		for value in embedding {
			let number = value
				.as_f64()
				.ok_or_else(|| EmbedError::Malformed("embedding value must be numeric".to_string()))?;

			vec.push(number as f32);
		}

		indexed.push((index, vec));
	}

	indexed.sort_by_key(|(index, _)| *index);

	Ok(indexed.into_iter().map(|(_, vec)| vec).collect())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_embeddings_in_index_order() {
		let json = serde_json::json!({
			"data": [
				{ "index": 1, "embedding": [2.0, 3.0] },
				{ "index": 0, "embedding": [0.5, 1.5] }
			]
		});
		let parsed = parse_embedding_response(json).expect("parse failed");

		assert_eq!(parsed.len(), 2);
		assert_eq!(parsed[0], vec![0.5, 1.5]);
		assert_eq!(parsed[1], vec![2.0, 3.0]);
	}

	#[test]
	fn rejects_non_numeric_embeddings() {
		let json = serde_json::json!({ "data": [ { "embedding": ["zero"] } ] });

		assert!(matches!(parse_embedding_response(json), Err(EmbedError::Malformed(_))));
	}
}
