//! Okapi BM25 with `k1 = 1.2`, `b = 0.75`.

use super::{top_k, Accumulator, Query, QueryEngine, ScoredDoc};
use crate::error::Result;

pub const BM25_K1: f64 = 1.2;
pub const BM25_B: f64 = 0.75;

/// `ln(1 + (N - df + 0.5) / (df + 0.5))`; never negative.
#[inline]
pub fn idf(num_docs: u64, df: u32) -> f64 {
    let (n, df) = (num_docs as f64, df as f64);
    (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
}

/// Contribution of one term occurrence count to a document's score.
#[inline]
pub fn term_score(idf: f64, tf: u32, doc_len: f64, avg_doc_len: f64) -> f64 {
    let tf = tf as f64;
    let norm = BM25_K1 * (1.0 - BM25_B + BM25_B * doc_len / avg_doc_len);
    idf * tf * (BM25_K1 + 1.0) / (tf + norm)
}

pub fn evaluate(query: &Query, engine: &QueryEngine, k: usize) -> Result<Vec<ScoredDoc>> {
    if query.is_empty() {
        return Ok(Vec::new());
    }
    let num_docs = engine.num_docs();
    let avg_len = engine.avg_doc_len();
    let mut reader = engine.postings()?;
    let mut acc = Accumulator::with_capacity(1024);

    for (term, _) in query.terms() {
        let Some(info) = engine.term_info(term) else { continue };
        let term_idf = idf(num_docs, info.df);
        engine.for_each_posting(&mut reader, term, info, |doc_id, tf| {
            // Postings for documents missing from the table fall back to the average length.
            let len = engine.document(doc_id).map_or(avg_len, |d| d.length as f64);
            acc.add(doc_id, term_score(term_idf, tf, len, avg_len));
        })?;
    }
    Ok(top_k(acc.into_entries(), k))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdfMode;
    use crate::retrieval::fixtures;
    use tempfile::tempdir;

    #[test]
    fn score_grows_with_tf() {
        let mut last = 0.0;
        for tf in 1..20 {
            let s = term_score(idf(100, 5), tf, 40.0, 50.0);
            assert!(s > last);
            last = s;
        }
        assert!(last < idf(100, 5) * (BM25_K1 + 1.0));
    }

    #[test]
    fn idf_stays_positive_for_common_terms() {
        assert!(idf(10, 10) > 0.0);
        assert!(idf(10, 1) > idf(10, 9));
    }

    #[test]
    fn repeated_term_ranks_higher_at_equal_length() {
        let dir = tempdir().unwrap();
        let engine = fixtures::build(
            dir.path(),
            &[(1, "apple pie"), (2, "apple apple"), (3, "cherry tart")],
            IdfMode::Smoothed,
        );
        let tokenizer = fixtures::tokenizer();
        let hits = evaluate(&Query::new("q", "apple", &tokenizer), &engine, 10).unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.doc_id).collect();
        assert_eq!(ids, vec![2, 1]);
    }
}
