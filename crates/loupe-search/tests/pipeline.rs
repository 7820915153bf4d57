//! End-to-end retrieval over an in-memory index seeded with a physics text.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use loupe_core::traits::Embedder;
use loupe_core::{LoupeError, Neighbors, SearchConfig, SearchMethod, SegmentOrder};
use loupe_search::search::Retriever;
use loupe_search::store::{chunk_id, SqliteIndex};

const DIMS: usize = 256;
const DOCUMENT: &str = "relativity";
const SIMULTANEITY_QUERY: &str = "What does it mean for two events to be simultaneous?";
const NONSENSE_QUERY: &str = "supercalifragilisticexpialidocious";

/// Hashed bag-of-words over tokens longer than three characters.
struct BagOfWords;

impl BagOfWords {
    fn embed(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; DIMS];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| t.len() > 3)
        {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            v[(hasher.finish() % DIMS as u64) as usize] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

#[async_trait]
impl Embedder for BagOfWords {
    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, LoupeError> {
        Ok(Self::embed(query))
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LoupeError> {
        Ok(texts.iter().map(|t| Self::embed(t)).collect())
    }
}

fn paragraphs() -> Vec<String> {
    include_str!("fixtures/relativity.txt")
        .split("\n\n")
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

async fn seeded(settings: SearchConfig) -> (Retriever, Vec<String>) {
    let index = Arc::new(SqliteIndex::in_memory().unwrap());
    let embedder = Arc::new(BagOfWords);

    let contents = paragraphs();
    let embeddings = embedder.embed_documents(&contents).await.unwrap();
    let chunks: Vec<(String, Vec<f32>)> = contents.iter().cloned().zip(embeddings).collect();
    index.insert_document(DOCUMENT, &chunks).unwrap();

    // A second, unrelated document so segments have a boundary to respect.
    let other: Vec<String> = vec![
        "Bread needs flour, water, salt and patience.".into(),
        "Knead the dough until it springs back.".into(),
    ];
    let other_embeddings = embedder.embed_documents(&other).await.unwrap();
    let other_chunks: Vec<(String, Vec<f32>)> = other.into_iter().zip(other_embeddings).collect();
    index.insert_document("baking", &other_chunks).unwrap();

    let retriever = Retriever::with_index(index, embedder, settings).unwrap();
    (retriever, contents)
}

#[tokio::test]
async fn simultaneity_query_finds_definition_with_every_method() {
    let (retriever, _) = seeded(SearchConfig::default()).await;

    for method in [SearchMethod::Keyword, SearchMethod::Vector, SearchMethod::Hybrid] {
        let results = retriever.search(method, SIMULTANEITY_QUERY, 5).await.unwrap();
        assert_eq!(results.chunk_ids.len(), 5, "{method} returned wrong count");
        assert_eq!(results.scores.len(), 5, "{method} returned wrong count");

        let chunks = retriever.retrieve_chunks(&results.chunk_ids).unwrap();
        assert!(
            chunks
                .iter()
                .any(|c| c.content.contains("Definition of Simultaneity")),
            "{method} missed the definition chunk"
        );
    }
}

#[tokio::test]
async fn hybrid_ranks_simultaneity_sections_first() {
    let (retriever, _) = seeded(SearchConfig::default()).await;
    let results = retriever.hybrid_search(SIMULTANEITY_QUERY, 5).await.unwrap();
    let top = [chunk_id(DOCUMENT, 7), chunk_id(DOCUMENT, 8)];
    assert!(top.contains(&results.chunk_ids[0]));
    assert!(results.scores.windows(2).all(|w| w[0] >= w[1]));
}

#[tokio::test]
async fn nonsense_query_has_no_keyword_hits_but_full_vector_results() {
    let (retriever, _) = seeded(SearchConfig::default()).await;

    let keyword = retriever.keyword_search(NONSENSE_QUERY, 5).await.unwrap();
    assert!(keyword.is_empty());

    let vector = retriever.vector_search(NONSENSE_QUERY, 5).await.unwrap();
    let hybrid = retriever.hybrid_search(NONSENSE_QUERY, 5).await.unwrap();
    for results in [&vector, &hybrid] {
        assert_eq!(results.len(), 5);
        assert!(results.scores.iter().all(|s| s.is_finite()));
    }
    assert_eq!(hybrid.chunk_ids, vector.chunk_ids);
}

#[tokio::test]
async fn vector_search_never_returns_fewer_than_indexed() {
    let (retriever, contents) = seeded(SearchConfig::default()).await;
    let total = contents.len() + 2;

    let results = retriever.vector_search("railway", 100).await.unwrap();
    assert_eq!(results.len(), total);
    assert!(results.scores.windows(2).all(|w| w[0] >= w[1]));
}

#[tokio::test]
async fn retrieved_chunks_round_trip_ids() {
    let (retriever, _) = seeded(SearchConfig::default()).await;
    let results = retriever.hybrid_search("railway embankment", 8).await.unwrap();
    let chunks = retriever.retrieve_chunks(&results.chunk_ids).unwrap();

    assert_eq!(chunks.len(), results.len());
    for (chunk, id) in chunks.iter().zip(&results.chunk_ids) {
        assert_eq!(&chunk.id, id);
    }
}

#[tokio::test]
async fn searches_are_repeatable() {
    let (retriever, _) = seeded(SearchConfig::default()).await;
    for method in [SearchMethod::Keyword, SearchMethod::Vector, SearchMethod::Hybrid] {
        let first = retriever.search(method, SIMULTANEITY_QUERY, 5).await.unwrap();
        let second = retriever.search(method, SIMULTANEITY_QUERY, 5).await.unwrap();
        assert_eq!(first, second, "{method} is not deterministic");
    }
}

#[tokio::test]
async fn single_chunk_without_neighbors_renders_its_content() {
    let (retriever, contents) = seeded(SearchConfig::default()).await;
    let segments = retriever
        .retrieve_segments(&[chunk_id(DOCUMENT, 7)], Neighbors::NONE)
        .unwrap();
    assert_eq!(segments, vec![contents[7].clone()]);
}

#[tokio::test]
async fn segments_from_search_results_do_not_overlap() {
    let (retriever, _) = seeded(SearchConfig::default()).await;
    let results = retriever.hybrid_search("railway carriage", 6).await.unwrap();
    let segments = retriever
        .assemble_segments(&results.chunk_ids, Neighbors::default())
        .unwrap();

    for (i, a) in segments.iter().enumerate() {
        assert_eq!(a.len(), a.end - a.start + 1);
        for b in &segments[i + 1..] {
            if a.document_id == b.document_id {
                assert!(a.end < b.start || b.end < a.start, "{a:?} overlaps {b:?}");
            }
        }
    }
}

#[tokio::test]
async fn neighbors_pull_in_surrounding_paragraphs() {
    let (retriever, contents) = seeded(SearchConfig::default()).await;
    let segments = retriever
        .retrieve_segments(&[chunk_id(DOCUMENT, 7)], Neighbors::default())
        .unwrap();

    let expected = [&contents[6], &contents[7], &contents[8]]
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    assert_eq!(segments, vec![expected]);
}

#[tokio::test]
async fn segments_clip_at_document_edges() {
    let (retriever, contents) = seeded(SearchConfig::default()).await;
    let last = contents.len() - 1;
    let ids = vec![chunk_id(DOCUMENT, 0), chunk_id(DOCUMENT, last), chunk_id("baking", 0)];
    let segments = retriever
        .assemble_segments(&ids, Neighbors::new(-2, 2).unwrap())
        .unwrap();

    let spans: Vec<(&str, usize, usize)> = segments
        .iter()
        .map(|s| (s.document_id.as_str(), s.start, s.end))
        .collect();
    assert_eq!(
        spans,
        vec![("baking", 0, 1), (DOCUMENT, 0, 2), (DOCUMENT, last - 2, last)]
    );
}

#[tokio::test]
async fn relevance_order_puts_best_match_first() {
    let settings = SearchConfig {
        segment_order: SegmentOrder::Relevance,
        segment_separator: " ".into(),
        ..SearchConfig::default()
    };
    let (retriever, contents) = seeded(settings).await;
    let ids = vec![chunk_id(DOCUMENT, 9), chunk_id(DOCUMENT, 2)];
    let segments = retriever.retrieve_segments(&ids, Neighbors::NONE).unwrap();
    assert_eq!(segments, vec![contents[9].clone(), contents[2].clone()]);
}

#[tokio::test]
async fn unknown_ids_surface_as_not_found() {
    let (retriever, _) = seeded(SearchConfig::default()).await;
    let ids = vec![chunk_id(DOCUMENT, 0), chunk_id(DOCUMENT, 99)];

    let err = retriever.retrieve_chunks(&ids).unwrap_err();
    assert!(matches!(err, LoupeError::NotFound(_)));
    assert!(err.to_string().contains("chunk retrieval"));

    let err = retriever
        .retrieve_segments(&ids, Neighbors::default())
        .unwrap_err();
    assert!(matches!(err, LoupeError::NotFound(_)));
}
