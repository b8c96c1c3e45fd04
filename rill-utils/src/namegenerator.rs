//! Unique-name generation seeded with already-taken names.

use crate::Id;
use std::collections::{HashMap, HashSet};

/// Generates fresh names for a prefix, never colliding with names it has
/// already handed out or that were declared taken up front.
#[derive(Clone, Debug, Default)]
pub struct NameGenerator {
    counts: HashMap<Id, u64>,
    taken: HashSet<Id>,
}

impl NameGenerator {
    /// Create a generator that will never produce any of `names`.
    pub fn with_prev_defined_names(names: HashSet<Id>) -> Self {
        NameGenerator {
            counts: HashMap::new(),
            taken: names,
        }
    }

    /// Mark additional names as taken.
    pub fn add_names(&mut self, names: impl IntoIterator<Item = Id>) {
        self.taken.extend(names)
    }

    /// Return a fresh name starting with `prefix`. The prefix itself is
    /// returned on first use; later calls append a counter.
    pub fn gen_name<S>(&mut self, prefix: S) -> Id
    where
        S: Into<Id>,
    {
        let mut prefix: Id = prefix.into();
        loop {
            let count = self.counts.entry(prefix).or_insert(0);
            let candidate = if *count == 0 {
                prefix
            } else {
                Id::new(format!("{}{}", prefix, count))
            };
            *count += 1;

            if self.taken.insert(candidate) {
                return candidate;
            }
            // Name already taken by the caller: retry with the candidate
            // as the new prefix.
            prefix = candidate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_names_do_not_collide() {
        let mut namegen = NameGenerator::default();
        assert_eq!(namegen.gen_name("main"), "main");
        assert_eq!(namegen.gen_name("main"), "main1");
        assert_eq!(namegen.gen_name("main"), "main2");
    }

    #[test]
    fn previously_defined_names_are_skipped() {
        let taken = ["body", "body1"].into_iter().map(Id::new).collect();
        let mut namegen = NameGenerator::with_prev_defined_names(taken);
        let name = namegen.gen_name("body");
        assert_ne!(name, "body");
        assert_ne!(name, "body1");
    }
}
