//! Batch planning for review tasks.
//!
//! Each changed file gets a token weight from a byte-length heuristic; files
//! are then packed greedily, in change order, into batches bounded by
//! `max_tokens_per_batch`. A file heavier than the whole budget gets its own
//! batch flagged `oversize` and is still submitted (the runner tolerates
//! truncation). Every batch carries the same whole-repository context-map
//! budget; the map itself is produced inside the assistant.
//!
//! Planning is pure: identical inputs yield identical plans, and flattening
//! a plan returns the input file list in its original order.

use serde::{Deserialize, Serialize};

/// Planner knobs, sourced from configuration and the settings store.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Token budget per batch.
    pub max_tokens_per_batch: u64,
    /// Context-map budget tagged onto every batch.
    pub context_map_tokens: u64,
    /// Byte-to-token ratio for the weight heuristic. Approximate by design;
    /// callers may swap in a real tokenizer by pre-computing weights.
    pub chars_per_token: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_tokens_per_batch: 100_000,
            context_map_tokens: 262_144,
            chars_per_token: 3.5,
        }
    }
}

/// A file queued for review with its estimated token weight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedFile {
    pub path: String,
    pub weight: u64,
}

/// One token-bounded subset of the change set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub index: usize,
    pub files: Vec<PlannedFile>,
    /// Set when a single file alone exceeds the batch budget.
    pub oversize: bool,
    pub context_map_tokens: u64,
}

impl Batch {
    pub fn total_weight(&self) -> u64 {
        self.files.iter().map(|f| f.weight).sum()
    }

    pub fn file_paths(&self) -> Vec<String> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }
}

/// Ordered list of batches covering every input file exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPlan {
    pub batches: Vec<Batch>,
}

impl BatchPlan {
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    /// All planned paths in batch order; equals the input order.
    pub fn flattened_paths(&self) -> Vec<&str> {
        self.batches
            .iter()
            .flat_map(|b| b.files.iter().map(|f| f.path.as_str()))
            .collect()
    }
}

/// Estimated token weight for a file of `bytes` length.
pub fn token_weight(bytes: u64, chars_per_token: f64) -> u64 {
    let ratio = if chars_per_token > 0.0 {
        chars_per_token
    } else {
        1.0
    };
    (bytes as f64 / ratio).ceil() as u64
}

/// Builds the batch plan for `files` given as `(path, byte_length)` pairs in
/// change order. An empty input yields a zero-batch plan.
pub fn plan_batches(files: &[(String, u64)], cfg: &PlannerConfig) -> BatchPlan {
    let mut batches: Vec<Batch> = Vec::new();
    let mut current: Vec<PlannedFile> = Vec::new();
    let mut current_weight: u64 = 0;

    let mut push_current = |current: &mut Vec<PlannedFile>, batches: &mut Vec<Batch>| {
        if !current.is_empty() {
            batches.push(Batch {
                index: batches.len(),
                files: std::mem::take(current),
                oversize: false,
                context_map_tokens: cfg.context_map_tokens,
            });
        }
    };

    for (path, bytes) in files {
        let weight = token_weight(*bytes, cfg.chars_per_token);

        if weight > cfg.max_tokens_per_batch {
            // Oversize file: close whatever is open, then emit a flagged
            // single-file batch so change order is preserved.
            push_current(&mut current, &mut batches);
            current_weight = 0;
            batches.push(Batch {
                index: batches.len(),
                files: vec![PlannedFile {
                    path: path.clone(),
                    weight,
                }],
                oversize: true,
                context_map_tokens: cfg.context_map_tokens,
            });
            continue;
        }

        if !current.is_empty() && current_weight + weight > cfg.max_tokens_per_batch {
            push_current(&mut current, &mut batches);
            current_weight = 0;
        }
        current.push(PlannedFile {
            path: path.clone(),
            weight,
        });
        current_weight += weight;
    }
    push_current(&mut current, &mut batches);

    BatchPlan { batches }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(max: u64) -> PlannerConfig {
        PlannerConfig {
            max_tokens_per_batch: max,
            context_map_tokens: 262_144,
            chars_per_token: 1.0, // byte == token keeps test arithmetic plain
        }
    }

    fn files(weights: &[u64]) -> Vec<(String, u64)> {
        weights
            .iter()
            .enumerate()
            .map(|(i, w)| (format!("f{}.rs", i + 1), *w))
            .collect()
    }

    #[test]
    fn empty_change_set_yields_zero_batches() {
        let plan = plan_batches(&[], &cfg(5000));
        assert!(plan.is_empty());
        assert_eq!(plan.len(), 0);
    }

    #[test]
    fn small_change_set_fits_one_batch() {
        let plan = plan_batches(&files(&[200, 400, 600]), &cfg(5000));
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.batches[0].files.len(), 3);
        assert_eq!(plan.batches[0].total_weight(), 1200);
        assert!(!plan.batches[0].oversize);
    }

    #[test]
    fn greedy_fill_respects_budget_and_order() {
        // 2000 each, budget 5000: pairs fill to 4000, a third would overflow.
        let plan = plan_batches(&files(&[2000, 2000, 2000, 2000, 2000, 2000, 2000]), &cfg(5000));
        assert_eq!(plan.len(), 4);
        for batch in &plan.batches {
            assert!(batch.total_weight() <= 5000);
        }
        assert_eq!(plan.batches[0].files.len(), 2);
        assert_eq!(plan.batches[3].files.len(), 1);
    }

    #[test]
    fn oversize_file_gets_own_flagged_batch() {
        let plan = plan_batches(&files(&[1000, 9000, 1000]), &cfg(5000));
        assert_eq!(plan.len(), 3);
        assert!(!plan.batches[0].oversize);
        assert!(plan.batches[1].oversize);
        assert_eq!(plan.batches[1].files[0].path, "f2.rs");
        assert!(!plan.batches[2].oversize);
    }

    #[test]
    fn flattening_round_trips_input_order() {
        let input = files(&[3000, 3000, 9000, 100, 100, 4900]);
        let plan = plan_batches(&input, &cfg(5000));
        let flattened = plan.flattened_paths();
        let original: Vec<&str> = input.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(flattened, original);
    }

    #[test]
    fn batch_indexes_are_contiguous() {
        let plan = plan_batches(&files(&[3000, 3000, 3000]), &cfg(5000));
        let idx: Vec<usize> = plan.batches.iter().map(|b| b.index).collect();
        assert_eq!(idx, vec![0, 1, 2]);
    }

    #[test]
    fn weight_heuristic_uses_ratio_ceiling() {
        assert_eq!(token_weight(7, 3.5), 2);
        assert_eq!(token_weight(8, 3.5), 3);
        assert_eq!(token_weight(0, 3.5), 0);
    }

    #[test]
    fn planning_is_deterministic() {
        let input = files(&[500, 4800, 300, 9001]);
        let a = plan_batches(&input, &cfg(5000));
        let b = plan_batches(&input, &cfg(5000));
        assert_eq!(a.flattened_paths(), b.flattened_paths());
        assert_eq!(a.len(), b.len());
    }

    #[test]
    fn context_map_budget_tags_every_batch() {
        let plan = plan_batches(&files(&[3000, 3000]), &cfg(5000));
        assert!(plan
            .batches
            .iter()
            .all(|b| b.context_map_tokens == 262_144));
    }
}
