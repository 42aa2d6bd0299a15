use std::collections::{HashMap, HashSet};

use crate::embedding::{cosine_similarity, l2_norm, l2_normalized, mean_vector};
use crate::error::PipelineError;
use crate::ports::{ClusterOutcome, Clusterer};

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "that", "with", "this", "from", "are", "was", "were", "will", "have",
    "has", "had", "not", "but", "can", "could", "should", "would", "about", "into", "over",
    "under", "their", "there", "what", "when", "where", "which", "while", "who", "how", "why",
    "all", "any", "more", "most", "some", "such", "than", "then", "too", "very", "our", "your",
    "its", "they", "them", "also", "been", "being", "does", "doing", "each", "other", "out",
    "title", "project", "facts", "knowledge", "decisions", "open", "questions",
];

/// Deterministic spherical k-means over unit document embeddings, with
/// farthest-first seeding, a cosine outlier cutoff, and per-cluster
/// keyword scoring. Stands in for a heavier clustering stack behind the
/// `Clusterer` port; given identical embeddings it always produces
/// identical output.
pub struct KMeansClusterer {
    max_iterations: usize,
    /// Documents scoring below this against their own centroid move to the
    /// outlier cluster `-1`.
    outlier_threshold: f32,
}

impl Default for KMeansClusterer {
    fn default() -> Self {
        KMeansClusterer {
            max_iterations: 25,
            outlier_threshold: 0.10,
        }
    }
}

impl KMeansClusterer {
    pub fn new() -> KMeansClusterer {
        KMeansClusterer::default()
    }

    pub fn with_outlier_threshold(mut self, threshold: f32) -> KMeansClusterer {
        self.outlier_threshold = threshold;
        self
    }
}

impl Clusterer for KMeansClusterer {
    fn cluster(
        &self,
        embeddings: &[Vec<f32>],
        documents: &[String],
        target_topics: usize,
    ) -> Result<ClusterOutcome, PipelineError> {
        if embeddings.len() != documents.len() {
            return Err(PipelineError::Clustering(format!(
                "{} embeddings for {} documents",
                embeddings.len(),
                documents.len()
            )));
        }
        if embeddings.is_empty() {
            return Ok(ClusterOutcome { labels: Vec::new(), keywords: HashMap::new() });
        }

        // Zero-norm rows (empty documents) are outliers from the start.
        let usable: Vec<usize> = (0..embeddings.len())
            .filter(|i| l2_norm(&embeddings[*i]) > 0.0)
            .collect();
        let mut labels = vec![-1i64; embeddings.len()];

        if !usable.is_empty() {
            let k = target_topics.max(1).min(usable.len());
            let points: Vec<Vec<f32>> =
                usable.iter().map(|i| l2_normalized(&embeddings[*i])).collect();

            let mut centroids = farthest_first_seeds(&points, k);
            let mut assignment = vec![0usize; points.len()];

            for _ in 0..self.max_iterations {
                let mut changed = false;
                for (idx, point) in points.iter().enumerate() {
                    let best = nearest_centroid(point, &centroids);
                    if assignment[idx] != best {
                        assignment[idx] = best;
                        changed = true;
                    }
                }

                for (cluster, centroid) in centroids.iter_mut().enumerate() {
                    let members: Vec<&[f32]> = points
                        .iter()
                        .enumerate()
                        .filter(|(idx, _)| assignment[*idx] == cluster)
                        .map(|(_, p)| p.as_slice())
                        .collect();
                    if !members.is_empty() {
                        *centroid = l2_normalized(&mean_vector(&members));
                    }
                }

                if !changed {
                    break;
                }
            }

            for (idx, point) in points.iter().enumerate() {
                let cluster = assignment[idx];
                let affinity =
                    cosine_similarity(point, &centroids[cluster]).unwrap_or(0.0);
                labels[usable[idx]] = if affinity < self.outlier_threshold {
                    -1
                } else {
                    cluster as i64
                };
            }
        }

        let keywords = cluster_keywords(documents, &labels);
        Ok(ClusterOutcome { labels, keywords })
    }
}

fn nearest_centroid(point: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_score = f32::MIN;
    for (idx, centroid) in centroids.iter().enumerate() {
        let score = cosine_similarity(point, centroid).unwrap_or(0.0);
        if score > best_score {
            best_score = score;
            best = idx;
        }
    }
    best
}

/// Deterministic seeding: start from the first document, then repeatedly
/// take the point least similar to every chosen seed (lowest index wins
/// ties).
fn farthest_first_seeds(points: &[Vec<f32>], k: usize) -> Vec<Vec<f32>> {
    let mut seeds = vec![points[0].clone()];
    let mut chosen = HashSet::from([0usize]);

    while seeds.len() < k {
        let mut farthest = None;
        let mut farthest_score = f32::MAX;
        for (idx, point) in points.iter().enumerate() {
            if chosen.contains(&idx) {
                continue;
            }
            let closest = seeds
                .iter()
                .map(|s| cosine_similarity(point, s).unwrap_or(0.0))
                .fold(f32::MIN, f32::max);
            if closest < farthest_score {
                farthest_score = closest;
                farthest = Some(idx);
            }
        }
        match farthest {
            Some(idx) => {
                chosen.insert(idx);
                seeds.push(points[idx].clone());
            }
            None => break,
        }
    }
    seeds
}

/// Keywords per cluster: term frequency weighted against how many other
/// clusters share the term, ties broken alphabetically.
fn cluster_keywords(documents: &[String], labels: &[i64]) -> HashMap<i64, Vec<String>> {
    let mut term_counts: HashMap<i64, HashMap<String, usize>> = HashMap::new();

    for (doc, label) in documents.iter().zip(labels) {
        if *label == -1 {
            continue;
        }
        let counts = term_counts.entry(*label).or_default();
        for token in tokenize(doc) {
            *counts.entry(token).or_default() += 1;
        }
    }

    let num_clusters = term_counts.len().max(1) as f64;
    let mut document_frequency: HashMap<&str, usize> = HashMap::new();
    for counts in term_counts.values() {
        for term in counts.keys() {
            *document_frequency.entry(term.as_str()).or_default() += 1;
        }
    }
    let document_frequency: HashMap<String, usize> = document_frequency
        .into_iter()
        .map(|(term, df)| (term.to_string(), df))
        .collect();

    term_counts
        .into_iter()
        .map(|(label, counts)| {
            let mut scored: Vec<(String, f64)> = counts
                .into_iter()
                .map(|(term, tf)| {
                    let df = document_frequency.get(&term).copied().unwrap_or(1) as f64;
                    let score = tf as f64 * (1.0 + (num_clusters / df).ln());
                    (term, score)
                })
                .collect();
            scored.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            });
            let top: Vec<String> = scored.into_iter().take(10).map(|(term, _)| term).collect();
            (label, top)
        })
        .collect()
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3 && !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis_embeddings() -> (Vec<Vec<f32>>, Vec<String>) {
        let embeddings = vec![
            vec![1.0, 0.0, 0.0],
            vec![0.9, 0.1, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.1, 0.9, 0.0],
            vec![0.0, 0.0, 0.0], // zero-norm -> outlier
        ];
        let documents = vec![
            "pricing tiers revenue pricing".to_string(),
            "pricing plans revenue".to_string(),
            "deployment infra kubernetes".to_string(),
            "infra deployment pipeline".to_string(),
            String::new(),
        ];
        (embeddings, documents)
    }

    #[test]
    fn separable_clusters_found() {
        let (embeddings, documents) = axis_embeddings();
        let outcome = KMeansClusterer::new()
            .cluster(&embeddings, &documents, 2)
            .unwrap();

        assert_eq!(outcome.labels.len(), 5);
        // First two docs together, next two together, zero vector outlier
        assert_eq!(outcome.labels[0], outcome.labels[1]);
        assert_eq!(outcome.labels[2], outcome.labels[3]);
        assert_ne!(outcome.labels[0], outcome.labels[2]);
        assert_eq!(outcome.labels[4], -1);
    }

    #[test]
    fn clustering_is_deterministic() {
        let (embeddings, documents) = axis_embeddings();
        let clusterer = KMeansClusterer::new();
        let first = clusterer.cluster(&embeddings, &documents, 2).unwrap();
        let second = clusterer.cluster(&embeddings, &documents, 2).unwrap();
        assert_eq!(first.labels, second.labels);
        assert_eq!(first.keywords, second.keywords);
    }

    #[test]
    fn keywords_reflect_cluster_content() {
        let (embeddings, documents) = axis_embeddings();
        let outcome = KMeansClusterer::new()
            .cluster(&embeddings, &documents, 2)
            .unwrap();

        let pricing_cluster = outcome.labels[0];
        let keywords = &outcome.keywords[&pricing_cluster];
        assert_eq!(keywords[0], "pricing");
        assert!(keywords.iter().all(|k| k != "infra"));
    }

    #[test]
    fn more_topics_than_documents_is_fine() {
        let embeddings = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let documents = vec!["alpha words".to_string(), "beta words".to_string()];
        let outcome = KMeansClusterer::new()
            .cluster(&embeddings, &documents, 50)
            .unwrap();
        let distinct: HashSet<i64> = outcome.labels.iter().copied().collect();
        assert_eq!(distinct.len(), 2);
    }

    #[test]
    fn empty_input_is_empty_outcome() {
        let outcome = KMeansClusterer::new().cluster(&[], &[], 10).unwrap();
        assert!(outcome.labels.is_empty());
        assert!(outcome.keywords.is_empty());
    }

    #[test]
    fn length_mismatch_is_an_error() {
        let err = KMeansClusterer::new()
            .cluster(&[vec![1.0]], &[], 1)
            .unwrap_err();
        assert!(err.to_string().contains("clustering error"));
    }
}
