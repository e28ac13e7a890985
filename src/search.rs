//! Free-text similarity search over stored messages

use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use crate::embedding::{cosine_similarity, EmbeddingService};
use crate::error::SearchError;
use crate::store::{EmbeddedMessage, MessageStore};

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub message: EmbeddedMessage,
    pub similarity: f64,
}

/// Top `limit` messages with similarity at or above `floor`, best first.
///
/// An unavailable provider is an error; a query that embeds to nothing
/// simply has no hits.
pub fn search(
    store: &MessageStore,
    service: &EmbeddingService,
    query: &str,
    limit: usize,
    floor: f64,
) -> Result<Vec<SearchHit>, SearchError> {
    let Some(query_vector) = service.embed(query)? else {
        debug!("query produced no embedding");
        return Ok(Vec::new());
    };

    let mut scored: Vec<(i64, f64)> = store
        .all_embeddings()?
        .into_iter()
        .map(|(id, v)| (id, cosine_similarity(&query_vector, &v)))
        .filter(|(_, similarity)| *similarity >= floor)
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored.truncate(limit);

    let ids: Vec<i64> = scored.iter().map(|(id, _)| *id).collect();
    let mut messages: HashMap<i64, EmbeddedMessage> = store
        .get_messages(&ids)?
        .into_iter()
        .map(|m| (m.id, m))
        .collect();

    Ok(scored
        .into_iter()
        .filter_map(|(id, similarity)| {
            messages
                .remove(&id)
                .map(|message| SearchHit { message, similarity })
        })
        .collect())
}
