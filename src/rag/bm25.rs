//! Okapi BM25 keyword ranking
//!
//! Scores follow the classic Okapi formulation:
//!
//! ```text
//! score(D, Q) = Σ_q  idf(q) · f(q,D)·(k1+1) / (f(q,D) + k1·(1 − b + b·|D|/avgdl))
//! idf(q)      = ln((N − n(q) + 0.5) / (n(q) + 0.5))
//! ```
//!
//! Terms that occur in more than half the corpus get a negative idf; those
//! are floored to `epsilon × mean(idf)` so common words never subtract.

use std::collections::HashMap;

use crate::config::RetrievalConfig;

/// BM25 tuning parameters
#[derive(Debug, Clone, Copy)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
    pub epsilon: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            epsilon: 0.25,
        }
    }
}

impl From<&RetrievalConfig> for Bm25Params {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            k1: config.bm25_k1,
            b: config.bm25_b,
            epsilon: config.bm25_epsilon,
        }
    }
}

/// Lowercase and split on whitespace
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

/// An immutable BM25 index over a tokenized corpus
#[derive(Debug, Clone)]
pub struct Bm25Index {
    params: Bm25Params,
    doc_freqs: Vec<HashMap<String, usize>>,
    doc_lens: Vec<usize>,
    avgdl: f64,
    idf: HashMap<String, f64>,
}

impl Bm25Index {
    pub fn new(corpus: &[Vec<String>], params: Bm25Params) -> Self {
        let mut doc_freqs = Vec::with_capacity(corpus.len());
        let mut doc_lens = Vec::with_capacity(corpus.len());
        let mut containing: HashMap<String, usize> = HashMap::new();
        let mut total_len = 0usize;

        for doc in corpus {
            let mut freqs: HashMap<String, usize> = HashMap::new();
            for token in doc {
                *freqs.entry(token.clone()).or_insert(0) += 1;
            }
            for term in freqs.keys() {
                *containing.entry(term.clone()).or_insert(0) += 1;
            }
            total_len += doc.len();
            doc_lens.push(doc.len());
            doc_freqs.push(freqs);
        }

        let n_docs = corpus.len() as f64;
        let avgdl = if corpus.is_empty() {
            0.0
        } else {
            total_len as f64 / n_docs
        };

        let mut idf = HashMap::with_capacity(containing.len());
        let mut idf_sum = 0.0;
        let mut negative = Vec::new();
        for (term, n) in containing {
            let n = n as f64;
            let value = ((n_docs - n + 0.5) / (n + 0.5)).ln();
            idf_sum += value;
            if value < 0.0 {
                negative.push(term.clone());
            }
            idf.insert(term, value);
        }

        if !idf.is_empty() {
            let floor = params.epsilon * (idf_sum / idf.len() as f64);
            for term in negative {
                idf.insert(term, floor);
            }
        }

        Self {
            params,
            doc_freqs,
            doc_lens,
            avgdl,
            idf,
        }
    }

    pub fn len(&self) -> usize {
        self.doc_lens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_lens.is_empty()
    }

    pub fn idf(&self, term: &str) -> Option<f64> {
        self.idf.get(term).copied()
    }

    /// One score per corpus document, in corpus order
    pub fn scores(&self, query: &[String]) -> Vec<f64> {
        let Bm25Params { k1, b, .. } = self.params;
        let mut scores = vec![0.0; self.doc_lens.len()];
        if self.avgdl <= 0.0 {
            return scores;
        }

        for term in query {
            let Some(idf) = self.idf.get(term) else {
                continue;
            };
            for (i, freqs) in self.doc_freqs.iter().enumerate() {
                let tf = freqs.get(term).copied().unwrap_or(0) as f64;
                if tf == 0.0 {
                    continue;
                }
                let norm = 1.0 - b + b * self.doc_lens[i] as f64 / self.avgdl;
                scores[i] += idf * (tf * (k1 + 1.0)) / (tf + k1 * norm);
            }
        }
        scores
    }

    /// Indices and scores of the `k` best documents with a positive score,
    /// highest first; ties keep corpus order.
    pub fn top_k(&self, query: &[String], k: usize) -> Vec<(usize, f64)> {
        let mut ranked: Vec<(usize, f64)> = self
            .scores(query)
            .into_iter()
            .enumerate()
            .filter(|(_, score)| *score > 0.0)
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(k);
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus(texts: &[&str]) -> Vec<Vec<String>> {
        texts.iter().map(|t| tokenize(t)).collect()
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("  Hello   World\tRUST "), vec!["hello", "world", "rust"]);
        assert!(tokenize("   ").is_empty());
    }

    #[test]
    fn test_idf_values() {
        let index = Bm25Index::new(
            &corpus(&["rust async", "rust traits", "python asyncio", "go channels"]),
            Bm25Params::default(),
        );
        // "rust": n=2, N=4 -> ln(2.5/2.5) = 0
        assert!(index.idf("rust").unwrap().abs() < 1e-12);
        // "async": n=1 -> ln(3.5/1.5)
        assert!((index.idf("async").unwrap() - (3.5f64 / 1.5).ln()).abs() < 1e-12);
        assert!(index.idf("missing").is_none());
    }

    #[test]
    fn test_negative_idf_floored() {
        // "common" occurs in 3 of 4 docs -> ln(1.5/3.5) < 0
        let index = Bm25Index::new(
            &corpus(&["common alpha", "common beta", "common gamma", "delta"]),
            Bm25Params::default(),
        );
        let idf = index.idf("common").unwrap();
        assert!(idf > 0.0);

        let rare = (3.5f64 / 1.5).ln();
        let mean = (4.0 * rare + (1.5f64 / 3.5).ln()) / 5.0;
        assert!((idf - 0.25 * mean).abs() < 1e-12);
    }

    #[test]
    fn test_top_k_orders_and_filters() {
        let index = Bm25Index::new(
            &corpus(&[
                "the quick brown fox",
                "rust ownership and borrowing",
                "borrowing rules in rust rust",
                "nothing relevant here",
                "python generators",
                "go channels",
            ]),
            Bm25Params::default(),
        );
        let top = index.top_k(&tokenize("rust borrowing"), 10);
        let ids: Vec<usize> = top.iter().map(|(i, _)| *i).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&1) && ids.contains(&2));
        assert!(top[0].1 >= top[1].1);
        assert!(index.top_k(&tokenize("zebra"), 10).is_empty());
    }

    #[test]
    fn test_empty_corpus() {
        let index = Bm25Index::new(&[], Bm25Params::default());
        assert!(index.is_empty());
        assert!(index.scores(&tokenize("anything")).is_empty());
    }
}
