//! Vector space model: cosine between tf-idf vectors.
//!
//! Query weight `w_q = tfn_q * idf`, document weight
//! `w_d = tf * idf / maxFreq(d)`. The document vector length is the stored
//! norm, so the score is `sum(w_q * w_d) / (|q| * norm(d))`.

use super::{top_k, Accumulator, Query, QueryEngine, ScoredDoc};
use crate::error::Result;

pub fn evaluate(query: &Query, engine: &QueryEngine, k: usize) -> Result<Vec<ScoredDoc>> {
    if query.is_empty() {
        return Ok(Vec::new());
    }
    let num_docs = engine.num_docs();
    let idf_mode = engine.manifest().idf;
    let mut reader = engine.postings()?;
    let mut acc = Accumulator::with_capacity(1024);
    let mut query_norm = 0.0;

    for (term, tfn) in query.terms() {
        let Some(info) = engine.term_info(term) else { continue };
        let idf = idf_mode.idf(num_docs, info.df);
        let wq = tfn * idf;
        if wq == 0.0 {
            continue;
        }
        query_norm += wq * wq;
        engine.for_each_posting(&mut reader, term, info, |doc_id, tf| {
            let max_freq = engine.document(doc_id).map_or(0, |d| d.max_freq);
            if max_freq > 0 {
                acc.add(doc_id, wq * tf as f64 * idf / max_freq as f64);
            }
        })?;
    }

    let query_norm = query_norm.sqrt();
    if query_norm == 0.0 {
        return Ok(Vec::new());
    }
    let cosines = acc.into_entries().into_iter().filter_map(|(doc_id, dot)| {
        let norm = engine.document(doc_id)?.norm.unwrap_or(0.0);
        (norm > 0.0).then(|| (doc_id, dot / (query_norm * norm)))
    });
    Ok(top_k(cosines, k))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdfMode;
    use crate::retrieval::fixtures;
    use tempfile::tempdir;

    const DOCS: &[(u64, &str)] = &[
        (1, "cat dog cat"),
        (2, "dog bird"),
        (3, "fish swim in the sea with other fish"),
    ];

    #[test]
    fn document_text_is_most_similar_to_itself() {
        let dir = tempdir().unwrap();
        let engine = fixtures::build(dir.path(), DOCS, IdfMode::Smoothed);
        let tokenizer = fixtures::tokenizer();
        for (id, text) in DOCS {
            let hits = evaluate(&Query::new("q", text, &tokenizer), &engine, 10).unwrap();
            assert_eq!(hits[0].doc_id, *id);
            assert!((hits[0].score - 1.0).abs() < 1e-9, "self score {}", hits[0].score);
            assert!(hits.iter().all(|h| h.score <= hits[0].score + 1e-12));
        }
    }

    #[test]
    fn unknown_and_empty_queries_score_nothing() {
        let dir = tempdir().unwrap();
        let engine = fixtures::build(dir.path(), DOCS, IdfMode::Smoothed);
        let tokenizer = fixtures::tokenizer();
        assert!(evaluate(&Query::new("q", "zebra", &tokenizer), &engine, 10).unwrap().is_empty());
        assert!(evaluate(&Query::new("q", "", &tokenizer), &engine, 10).unwrap().is_empty());
    }

    #[test]
    fn plain_idf_ignores_ubiquitous_terms() {
        let dir = tempdir().unwrap();
        let engine = fixtures::build(dir.path(), &[(1, "cat dog cat"), (2, "dog bird")], IdfMode::Plain);
        let tokenizer = fixtures::tokenizer();
        assert!(evaluate(&Query::new("q", "dog", &tokenizer), &engine, 10).unwrap().is_empty());
        let hits = evaluate(&Query::new("q", "cat", &tokenizer), &engine, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, 1);
    }
}
