//! Order-preserving chunk retrieval.

use std::collections::HashMap;

use loupe_core::traits::ChunkStore;
use loupe_core::{Chunk, ChunkId, LoupeError};

/// Fetch the chunks for `ids` in one batched lookup and return them in the
/// same order as `ids`.
///
/// Repeated identifiers are looked up once and repeated in the output.
///
/// # Errors
///
/// Returns [`LoupeError::NotFound`] listing every identifier the store has no
/// chunk for; store failures propagate unchanged.
pub fn retrieve(store: &dyn ChunkStore, ids: &[ChunkId]) -> Result<Vec<Chunk>, LoupeError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut unique: Vec<ChunkId> = Vec::with_capacity(ids.len());
    let mut by_id: HashMap<ChunkId, Option<Chunk>> = HashMap::with_capacity(ids.len());
    for id in ids {
        if !by_id.contains_key(id) {
            by_id.insert(id.clone(), None);
            unique.push(id.clone());
        }
    }

    for chunk in store.chunks_by_ids(&unique)? {
        if let Some(slot) = by_id.get_mut(&chunk.id) {
            *slot = Some(chunk);
        }
    }

    let missing: Vec<&str> = unique
        .iter()
        .filter(|id| matches!(by_id.get(*id), Some(None)))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(LoupeError::NotFound(format!(
            "no chunk for id(s): {}",
            missing.join(", ")
        )));
    }

    ids.iter()
        .map(|id| {
            by_id
                .get(id)
                .and_then(Clone::clone)
                .ok_or_else(|| LoupeError::NotFound(format!("no chunk for id: {id}")))
        })
        .collect()
}
