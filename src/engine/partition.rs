use crate::config::PartitionConfig;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Zero-based bucket for `rule`: the SHA-256 digest, read as a big-endian
/// integer, modulo `parts`.
pub fn shard_of(rule: &str, parts: usize) -> usize {
    let digest = Sha256::digest(rule.as_bytes());
    let parts = parts.max(1) as u64;
    let rem = digest
        .iter()
        .fold(0u64, |acc, byte| (acc * 256 + u64::from(*byte)) % parts);
    rem as usize
}

/// Hash sharding with a bounded size-imbalance correction pass.
#[derive(Debug, Clone)]
pub struct Partitioner {
    parts: usize,
    balance_threshold: usize,
    move_limit: usize,
}

impl Partitioner {
    pub fn new(parts: usize, config: &PartitionConfig) -> Self {
        Self {
            parts: parts.max(1),
            balance_threshold: config.balance_threshold,
            move_limit: config.balance_move_limit,
        }
    }

    pub fn parts(&self) -> usize {
        self.parts
    }

    /// Splits `rules` into `parts` buckets. Input order does not matter: rules
    /// are sorted first so the result is deterministic.
    pub fn split(&self, rules: impl IntoIterator<Item = String>) -> Vec<Vec<String>> {
        let mut sorted: Vec<String> = rules.into_iter().collect();
        sorted.sort();

        let mut buckets: Vec<Vec<String>> = vec![Vec::new(); self.parts];
        for rule in sorted {
            let idx = shard_of(&rule, self.parts);
            buckets[idx].push(rule);
        }

        let moved = self.rebalance(&mut buckets);
        debug!("Partition rebalancing moved {} rules", moved);
        buckets
    }

    /// Moves rules from the largest bucket to the smallest until their sizes
    /// are within `balance_threshold`. Returns the number of rules moved.
    ///
    /// Every move shrinks the sum of squared bucket sizes, so the loop ends.
    pub fn rebalance(&self, buckets: &mut [Vec<String>]) -> usize {
        let mut moved = 0;
        if buckets.len() < 2 {
            return moved;
        }

        loop {
            let (max_idx, max_len) = first_extreme(buckets, |a, b| a > b);
            let (min_idx, min_len) = first_extreme(buckets, |a, b| a < b);

            let gap = max_len - min_len;
            if gap <= self.balance_threshold {
                break;
            }

            let move_count = self.move_limit.min(gap / 2);
            if move_count == 0 {
                break;
            }

            let split_at = buckets[max_idx].len() - move_count;
            let tail = buckets[max_idx].split_off(split_at);
            buckets[min_idx].extend(tail);
            moved += move_count;
        }

        moved
    }
}

/// Index and length of the first bucket that wins `better` against all others.
fn first_extreme(
    buckets: &[Vec<String>],
    better: impl Fn(usize, usize) -> bool,
) -> (usize, usize) {
    let mut best = (0, buckets[0].len());
    for (idx, bucket) in buckets.iter().enumerate().skip(1) {
        if better(bucket.len(), best.1) {
            best = (idx, bucket.len());
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn partitioner(parts: usize) -> Partitioner {
        Partitioner::new(parts, &PartitionConfig::default())
    }

    fn rules(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("||host{i}.example^")).collect()
    }

    #[test]
    fn test_shard_of_is_stable() {
        for rule in rules(200) {
            let first = shard_of(&rule, 16);
            assert!(first < 16);
            assert_eq!(first, shard_of(&rule, 16));
        }
    }

    #[test]
    fn test_shard_of_matches_digest_low_nibble() {
        // 16 divides 256, so the big-integer remainder is the last byte mod 16.
        for rule in rules(50) {
            let digest = Sha256::digest(rule.as_bytes());
            assert_eq!(shard_of(&rule, 16), (digest[31] % 16) as usize);
        }
    }

    #[test]
    fn test_split_preserves_multiset() {
        let input = rules(1000);
        let buckets = partitioner(16).split(input.clone());
        assert_eq!(buckets.len(), 16);

        let mut flat: Vec<String> = buckets.into_iter().flatten().collect();
        flat.sort();
        let mut expected = input;
        expected.sort();
        assert_eq!(flat, expected);
    }

    #[test]
    fn test_split_balances_within_threshold() {
        let buckets = partitioner(16).split(rules(5003));
        let max = buckets.iter().map(Vec::len).max().unwrap();
        let min = buckets.iter().map(Vec::len).min().unwrap();
        assert!(max - min <= 1, "gap {} too large", max - min);
    }

    #[test]
    fn test_split_is_deterministic_regardless_of_input_order() {
        let mut reversed = rules(400);
        reversed.reverse();
        assert_eq!(partitioner(8).split(rules(400)), partitioner(8).split(reversed));
    }

    #[test]
    fn test_rebalance_moves_at_most_limit_per_step() {
        let p = partitioner(2);
        let mut buckets = vec![rules(300), Vec::new()];
        let moved = p.rebalance(&mut buckets);
        assert_eq!(moved, 150);
        assert_eq!(buckets[0].len(), 150);
        assert_eq!(buckets[1].len(), 150);
    }

    #[test]
    fn test_rebalance_tie_uses_first_index() {
        let p = partitioner(3);
        let mut buckets = vec![rules(4), rules(4), Vec::new()];
        p.rebalance(&mut buckets);
        // [4, 4, 0] -> bucket 0 gives two to bucket 2 -> [2, 4, 2]; then bucket 1
        // gives one to the first smallest (bucket 0) -> [3, 3, 2].
        assert_eq!(
            buckets.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![3, 3, 2]
        );
    }

    #[test]
    fn test_unmoved_rules_keep_hash_placement() {
        let p = partitioner(16);
        let buckets = p.split(rules(2000));
        let mut misplaced: HashMap<usize, usize> = HashMap::new();
        for (idx, bucket) in buckets.iter().enumerate() {
            for rule in bucket {
                if shard_of(rule, 16) != idx {
                    *misplaced.entry(idx).or_default() += 1;
                }
            }
        }
        let total: usize = misplaced.values().sum();
        assert!(total < 2000 / 2, "rebalancing moved too many rules: {total}");
    }
}
