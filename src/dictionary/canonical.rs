//! Canonical translation selection.
//!
//! Raw localization data repeats the same source string many times, often
//! with drifting translations. For each distinct source the most frequent
//! non-empty target wins; ties go to the target seen first.
use std::collections::HashMap;

use super::TextPair;

/// The chosen translation for one distinct source string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canonical {
    pub source: String,
    /// `None` when every occurrence had an empty target.
    pub target: Option<String>,
    /// How many occurrences carried the chosen target.
    pub votes: usize,
    /// Total occurrences of the source, empty targets included.
    pub occurrences: usize,
}

/// Canonical targets keyed by source, in first-appearance order.
#[derive(Debug, Clone, Default)]
pub struct CanonicalMap {
    entries: Vec<Canonical>,
    lookup: HashMap<String, usize>,
}

impl CanonicalMap {
    #[must_use]
    pub fn get(&self, source: &str) -> Option<&Canonical> {
        self.lookup.get(source).map(|&i| &self.entries[i])
    }

    /// The canonical target of `source`, if it has a usable one.
    #[must_use]
    pub fn target(&self, source: &str) -> Option<&str> {
        self.get(source).and_then(|c| c.target.as_deref())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Canonical> {
        self.entries.iter()
    }
}

impl IntoIterator for CanonicalMap {
    type Item = Canonical;
    type IntoIter = std::vec::IntoIter<Canonical>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

struct Tally {
    source: String,
    /// (target, count) in first-seen order.
    targets: Vec<(String, usize)>,
    occurrences: usize,
}

/// Pick one canonical target per distinct source.
///
/// Sources are compared exactly; callers clean them beforehand. Whitespace-only
/// targets count as empty. The result depends only on the input order.
#[must_use]
pub fn select_canonical(pairs: &[TextPair]) -> CanonicalMap {
    let mut tallies: Vec<Tally> = Vec::new();
    let mut lookup: HashMap<String, usize> = HashMap::new();

    for pair in pairs {
        let slot = *lookup.entry(pair.source.clone()).or_insert_with(|| {
            tallies.push(Tally {
                source: pair.source.clone(),
                targets: Vec::new(),
                occurrences: 0,
            });
            tallies.len() - 1
        });
        let tally = &mut tallies[slot];
        tally.occurrences += 1;

        if pair.target.trim().is_empty() {
            continue;
        }
        match tally.targets.iter_mut().find(|(t, _)| *t == pair.target) {
            Some((_, count)) => *count += 1,
            None => tally.targets.push((pair.target.clone(), 1)),
        }
    }

    let entries = tallies
        .into_iter()
        .map(|tally| {
            let mut best: Option<(String, usize)> = None;
            for (target, count) in tally.targets {
                // strictly greater keeps the earliest target on ties
                if best.as_ref().is_none_or(|(_, c)| count > *c) {
                    best = Some((target, count));
                }
            }
            let (target, votes) = match best {
                Some((t, c)) => (Some(t), c),
                None => (None, 0),
            };
            Canonical {
                source: tally.source,
                target,
                votes,
                occurrences: tally.occurrences,
            }
        })
        .collect();

    CanonicalMap { entries, lookup }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(raw: &[(&str, &str)]) -> Vec<TextPair> {
        raw.iter().map(|(s, t)| TextPair::new(*s, *t)).collect()
    }

    #[test]
    fn test_majority_wins() {
        let map = select_canonical(&pairs(&[
            ("안녕", "Hello"),
            ("안녕", "Hi"),
            ("안녕", "Hello"),
        ]));
        assert_eq!(map.len(), 1);
        assert_eq!(map.target("안녕"), Some("Hello"));
        let c = map.get("안녕").unwrap();
        assert_eq!(c.votes, 2);
        assert_eq!(c.occurrences, 3);
    }

    #[test]
    fn test_tie_goes_to_first_seen() {
        let map = select_canonical(&pairs(&[("검", "Sword"), ("검", "Blade")]));
        assert_eq!(map.target("검"), Some("Sword"));

        let map = select_canonical(&pairs(&[("검", "Blade"), ("검", "Sword")]));
        assert_eq!(map.target("검"), Some("Blade"));
    }

    #[test]
    fn test_empty_targets_ignored_unless_all_empty() {
        let map = select_canonical(&pairs(&[
            ("방패", ""),
            ("방패", "  "),
            ("방패", "Shield"),
            ("활", ""),
        ]));
        assert_eq!(map.target("방패"), Some("Shield"));
        assert_eq!(map.get("방패").unwrap().occurrences, 3);
        assert_eq!(map.target("활"), None);
        assert!(map.get("활").is_some());
    }

    #[test]
    fn test_first_appearance_order() {
        let map = select_canonical(&pairs(&[("b", "B"), ("a", "A"), ("b", "B2")]));
        let sources: Vec<&str> = map.iter().map(|c| c.source.as_str()).collect();
        assert_eq!(sources, vec!["b", "a"]);
    }

    #[test]
    fn test_deterministic() {
        let input = pairs(&[
            ("x", "1"),
            ("y", "2"),
            ("x", "3"),
            ("x", "1"),
            ("y", "4"),
            ("y", "4"),
        ]);
        let first: Vec<Canonical> = select_canonical(&input).into_iter().collect();
        for _ in 0..5 {
            let again: Vec<Canonical> = select_canonical(&input).into_iter().collect();
            assert_eq!(first, again);
        }
        assert_eq!(first[0].target.as_deref(), Some("1"));
        assert_eq!(first[1].target.as_deref(), Some("4"));
    }
}
