//! Small shared utilities: atomic whole-file writes (§5 resource policy)
//! and weighted sampling helpers used by the controller and refiner.

use crate::error::Result;
use rand::Rng;
use std::path::Path;

/// Write `contents` to `path` atomically: write to a sibling temp file,
/// then rename over the destination. Avoids readers ever observing a
/// partially-written file.
pub fn write_file_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let tmp_path = dir.join(format!(
        ".{}.tmp{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("out"),
        std::process::id()
    ));
    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Weighted choice among `items` by `weight_fn`; falls back to uniform
/// choice when every weight is zero (§4.C6 step c).
pub fn weighted_choice<'a, T>(
    items: &'a [T],
    weight_fn: impl Fn(&T) -> f64,
    rng: &mut impl Rng,
) -> Option<&'a T> {
    if items.is_empty() {
        return None;
    }
    let weights: Vec<f64> = items.iter().map(&weight_fn).collect();
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        let idx = rng.random_range(0..items.len());
        return items.get(idx);
    }
    let mut threshold = rng.random_range(0.0..total);
    for (item, w) in items.iter().zip(weights.iter()) {
        if threshold < *w {
            return Some(item);
        }
        threshold -= w;
    }
    items.last()
}

/// Sample `k` distinct items from `items`, weighted by `weight_fn`, without
/// replacement. Used for "rank then sample top K by score-weighted draw"
/// (§4.C6.c, §4.C7.2).
pub fn weighted_sample_without_replacement<'a, T>(
    items: &'a [T],
    k: usize,
    weight_fn: impl Fn(&T) -> f64,
    rng: &mut impl Rng,
) -> Vec<&'a T> {
    let mut pool: Vec<&T> = items.iter().collect();
    let mut chosen = Vec::with_capacity(k.min(pool.len()));
    while !pool.is_empty() && chosen.len() < k {
        let weights: Vec<f64> = pool.iter().map(|item| weight_fn(item)).collect();
        let total: f64 = weights.iter().sum();
        let idx = if total <= 0.0 {
            rng.random_range(0..pool.len())
        } else {
            let mut threshold = rng.random_range(0.0..total);
            let mut chosen_idx = pool.len() - 1;
            for (i, w) in weights.iter().enumerate() {
                if threshold < *w {
                    chosen_idx = i;
                    break;
                }
                threshold -= w;
            }
            chosen_idx
        };
        chosen.push(pool.remove(idx));
    }
    chosen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_creates_readable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        write_file_atomic(&path, b"{\"a\":1}").unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "{\"a\":1}");
    }

    #[test]
    fn weighted_choice_uniform_fallback_when_all_zero() {
        let items = vec![1, 2, 3];
        let mut rng = rand::rng();
        let picked = weighted_choice(&items, |_| 0.0, &mut rng);
        assert!(picked.is_some());
    }

    #[test]
    fn weighted_sample_without_replacement_returns_k_distinct() {
        let items = vec![1, 2, 3, 4, 5];
        let mut rng = rand::rng();
        let picked = weighted_sample_without_replacement(&items, 3, |&v| v as f64, &mut rng);
        assert_eq!(picked.len(), 3);
        let mut unique = picked.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 3);
    }
}
