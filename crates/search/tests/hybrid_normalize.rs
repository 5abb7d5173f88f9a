use context_code_chunker::{ChunkMetadata, CodeChunk};
use context_search::hybrid::HybridSearch;
use context_vector_store::SearchResult;

fn make_result(score: f32) -> SearchResult {
    let chunk = CodeChunk::new(
        "file.rs".into(),
        1,
        1,
        "fn demo() {}".into(),
        ChunkMetadata::default(),
    );
    SearchResult::from_chunk(chunk, score, 0)
}

#[test]
fn normalize_scores_skips_non_finite_and_handles_singleton() {
    let mut results = vec![make_result(f32::NAN), make_result(10.0)];

    HybridSearch::normalize_scores(&mut results);

    assert_eq!(results[0].similarity_score, 0.0, "NaN must be reset to 0");
    assert_eq!(
        results[1].similarity_score, 1.0,
        "Max score should normalize to 1"
    );
}

#[test]
fn normalize_scores_avoids_tiny_delta_and_inf() {
    let mut results = vec![
        make_result(1.0),
        make_result(1.0 + 5e-7), // below MIN_DELTA
        make_result(f32::INFINITY),
    ];

    HybridSearch::normalize_scores(&mut results);

    for res in &results {
        assert!(
            (res.similarity_score - 1.0).abs() < f32::EPSILON,
            "All scores should be equal when delta is tiny"
        );
    }
}
