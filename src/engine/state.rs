use rustc_hash::FxHashMap;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::warn;

/// A persisted counter value.
///
/// Older counter files occasionally carry ratio strings such as `"27/4"`;
/// those decode to their numerator and are always written back as integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct Count(pub u32);

impl<'de> Deserialize<'de> for Count {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        RawCount::deserialize(deserializer)?
            .into_count()
            .map(Count)
            .ok_or_else(|| de::Error::custom("invalid counter value"))
    }
}

/// Any value a counter file may hold in a count position.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawCount {
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Text(String),
    Other(de::IgnoredAny),
}

impl RawCount {
    fn into_count(self) -> Option<u32> {
        match self {
            RawCount::Unsigned(n) => Some(u32::try_from(n).unwrap_or(u32::MAX)),
            RawCount::Signed(n) => Some(n.clamp(0, i64::from(u32::MAX)) as u32),
            RawCount::Float(f) if f.is_finite() => Some(f.clamp(0.0, f64::from(u32::MAX)) as u32),
            RawCount::Float(_) | RawCount::Other(_) => None,
            RawCount::Text(s) => parse_legacy_count(&s),
        }
    }
}

fn parse_legacy_count(text: &str) -> Option<u32> {
    let numerator = match text.split_once('/') {
        Some((num, _)) => num,
        None => text,
    };
    numerator.trim().parse().ok()
}

/// Decodes a rule -> count map, dropping entries whose value is unusable.
fn lenient_counts<'de, D>(deserializer: D) -> Result<FxHashMap<String, Count>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = FxHashMap::<String, RawCount>::deserialize(deserializer)?;
    let total = raw.len();
    let counts: FxHashMap<String, Count> = raw
        .into_iter()
        .filter_map(|(rule, value)| value.into_count().map(|n| (rule, Count(n))))
        .collect();
    if counts.len() < total {
        warn!("Dropped {} unreadable counter entries", total - counts.len());
    }
    Ok(counts)
}

/// Decodes the per-shard map, dropping shards whose value is not a map.
fn lenient_shards<'de, D>(deserializer: D) -> Result<FxHashMap<String, WriteCounter>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawShard {
        Map(WriteCounter),
        Other(de::IgnoredAny),
    }

    let raw = FxHashMap::<String, RawShard>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|(key, shard)| match shard {
            RawShard::Map(counter) => Some((key, counter)),
            RawShard::Other(_) => {
                warn!("Dropped unreadable write counter for {}", key);
                None
            }
        })
        .collect())
}

/// Global rule -> consecutive DNS failure count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeleteCounter {
    #[serde(deserialize_with = "lenient_counts")]
    counts: FxHashMap<String, Count>,
}

impl DeleteCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Missing rules count as zero failures.
    pub fn get(&self, rule: &str) -> u32 {
        self.counts.get(rule).map(|c| c.0).unwrap_or(0)
    }

    pub fn contains(&self, rule: &str) -> bool {
        self.counts.contains_key(rule)
    }

    pub fn set(&mut self, rule: &str, value: u32) {
        match self.counts.get_mut(rule) {
            Some(count) => count.0 = value,
            None => {
                self.counts.insert(rule.to_string(), Count(value));
            }
        }
    }

    pub fn increment(&mut self, rule: &str) -> u32 {
        let next = self.get(rule).saturating_add(1);
        self.set(rule, next);
        next
    }

    pub fn remove(&mut self, rule: &str) -> Option<u32> {
        self.counts.remove(rule).map(|c| c.0)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&str, &mut u32) -> bool) {
        self.counts.retain(|rule, count| keep(rule, &mut count.0));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.counts.iter().map(|(rule, count)| (rule.as_str(), count.0))
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Overlays `changes` onto this snapshot. `None` deletes the entry.
    pub fn merge(&mut self, changes: impl IntoIterator<Item = (String, Option<u32>)>) {
        for (rule, value) in changes {
            match value {
                Some(v) => {
                    self.counts.insert(rule, Count(v));
                }
                None => {
                    self.counts.remove(&rule);
                }
            }
        }
    }
}

impl FromIterator<(String, u32)> for DeleteCounter {
    fn from_iter<T: IntoIterator<Item = (String, u32)>>(iter: T) -> Self {
        Self {
            counts: iter.into_iter().map(|(r, c)| (r, Count(c))).collect(),
        }
    }
}

/// One shard's rule -> freshness credit map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WriteCounter {
    #[serde(deserialize_with = "lenient_counts")]
    credits: FxHashMap<String, Count>,
}

impl WriteCounter {
    pub fn get(&self, rule: &str) -> Option<u32> {
        self.credits.get(rule).map(|c| c.0)
    }

    pub fn set(&mut self, rule: &str, value: u32) {
        self.credits.insert(rule.to_string(), Count(value));
    }

    pub fn remove(&mut self, rule: &str) -> Option<u32> {
        self.credits.remove(rule).map(|c| c.0)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.credits.retain(|rule, _| keep(rule));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.credits.iter().map(|(rule, c)| (rule.as_str(), c.0))
    }

    pub fn len(&self) -> usize {
        self.credits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credits.is_empty()
    }
}

impl FromIterator<(String, u32)> for WriteCounter {
    fn from_iter<T: IntoIterator<Item = (String, u32)>>(iter: T) -> Self {
        Self {
            credits: iter.into_iter().map(|(r, c)| (r, Count(c))).collect(),
        }
    }
}

/// Every shard's [`WriteCounter`], keyed by `validated_part_<n>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotWrittenCounter {
    #[serde(deserialize_with = "lenient_shards")]
    shards: FxHashMap<String, WriteCounter>,
}

impl NotWrittenCounter {
    pub fn shard_key(part: usize) -> String {
        format!("validated_part_{part}")
    }

    pub fn shard(&self, part: usize) -> WriteCounter {
        self.shards
            .get(&Self::shard_key(part))
            .cloned()
            .unwrap_or_default()
    }

    pub fn replace_shard(&mut self, part: usize, counter: WriteCounter) {
        self.shards.insert(Self::shard_key(part), counter);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &WriteCounter)> {
        self.shards.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

/// Durable state owned by a single shard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardState {
    pub published: BTreeSet<String>,
    pub write_counter: WriteCounter,
}

impl ShardState {
    pub fn new(published: BTreeSet<String>, write_counter: WriteCounter) -> Self {
        Self {
            published,
            write_counter,
        }
    }

    /// Drops rules that another shard now owns. Returns how many were released.
    pub fn release<'a>(&mut self, rules: impl IntoIterator<Item = &'a str>) -> usize {
        let mut released = 0;
        for rule in rules {
            if self.published.remove(rule) {
                released += 1;
            }
            self.write_counter.remove(rule);
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_counter_defaults_to_zero() {
        let mut dc = DeleteCounter::new();
        assert_eq!(dc.get("|a^"), 0);
        assert_eq!(dc.increment("|a^"), 1);
        assert_eq!(dc.increment("|a^"), 2);
        dc.set("|a^", 0);
        assert_eq!(dc.get("|a^"), 0);
        assert!(dc.contains("|a^"));
    }

    #[test]
    fn test_merge_overlays_and_deletes() {
        let mut dc: DeleteCounter = vec![("a".to_string(), 3), ("b".to_string(), 30)]
            .into_iter()
            .collect();
        dc.merge(vec![("a".to_string(), Some(4)), ("b".to_string(), None)]);
        assert_eq!(dc.get("a"), 4);
        assert!(!dc.contains("b"));
    }

    #[test]
    fn test_legacy_ratio_strings_decode() {
        assert_eq!(parse_legacy_count("27/4"), Some(27));
        assert_eq!(parse_legacy_count(" 5 "), Some(5));
        assert_eq!(parse_legacy_count("x/4"), None);
    }

    #[test]
    fn test_release_drops_published_and_credit() {
        let mut state = ShardState::new(
            ["a".to_string(), "b".to_string()].into_iter().collect(),
            vec![("a".to_string(), 6)].into_iter().collect(),
        );
        assert_eq!(state.release(["a", "missing"]), 1);
        assert!(!state.published.contains("a"));
        assert_eq!(state.write_counter.get("a"), None);
        assert!(state.published.contains("b"));
    }
}
