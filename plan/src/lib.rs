// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Keyed-table diffing.
//!
//! Every reconciled table (entries, routes, ARP neighbors, forwarding
//! database, IPsec policies) is modeled as a map from a structural key to a
//! desired-state value. [`diff`] compares the observed map against the
//! desired map and splits the key space into the four disjoint sets a
//! reconciler acts on.

#![deny(
    unsafe_code,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]

use std::collections::HashMap;
use std::hash::Hash;

/// The mutation plan converging an observed table onto a desired table.
///
/// The four maps are disjoint by construction and jointly cover
/// `keys(old) ∪ keys(new)`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TablePlan<K, V> {
    /// Keys present in the desired table only; values are the desired state.
    pub add: HashMap<K, V>,
    /// Keys present in the observed table only; values are the observed state.
    pub remove: HashMap<K, V>,
    /// Keys present in both with differing values; values are the desired state.
    pub update: HashMap<K, V>,
    /// Keys present in both with equal values.
    pub noop: HashMap<K, V>,
}

impl<K, V> TablePlan<K, V> {
    /// True iff applying the plan would mutate nothing.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty() && self.update.is_empty()
    }

    /// Number of mutations the plan carries.
    #[must_use]
    pub fn mutation_count(&self) -> usize {
        self.add.len() + self.remove.len() + self.update.len()
    }
}

/// Compare an observed table with a desired table.
///
/// `add = new \ old`, `remove = old \ new`, `update` and `noop` split the
/// intersection by structural equality of the values.
#[must_use]
pub fn diff<K, V>(old: &HashMap<K, V>, new: &HashMap<K, V>) -> TablePlan<K, V>
where
    K: Eq + Hash + Clone,
    V: PartialEq + Clone,
{
    let mut plan = TablePlan {
        add: HashMap::new(),
        remove: HashMap::new(),
        update: HashMap::new(),
        noop: HashMap::new(),
    };
    for (key, desired) in new {
        match old.get(key) {
            None => {
                plan.add.insert(key.clone(), desired.clone());
            }
            Some(observed) if observed == desired => {
                plan.noop.insert(key.clone(), desired.clone());
            }
            Some(_) => {
                plan.update.insert(key.clone(), desired.clone());
            }
        }
    }
    for (key, observed) in old {
        if !new.contains_key(key) {
            plan.remove.insert(key.clone(), observed.clone());
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::{TablePlan, diff};
    use std::collections::HashMap;

    fn map(pairs: &[(u8, u8)]) -> HashMap<u8, u8> {
        pairs.iter().copied().collect()
    }

    /// Model application of a plan to the observed table.
    fn apply(old: &HashMap<u8, u8>, plan: &TablePlan<u8, u8>) -> HashMap<u8, u8> {
        let mut table = old.clone();
        for key in plan.remove.keys() {
            table.remove(key);
        }
        for (key, value) in plan.add.iter().chain(plan.update.iter()) {
            table.insert(*key, *value);
        }
        table
    }

    #[test]
    fn splits_key_space() {
        let old = map(&[(1, 10), (2, 20), (3, 30)]);
        let new = map(&[(2, 21), (3, 30), (4, 40)]);
        let plan = diff(&old, &new);
        assert_eq!(plan.add, map(&[(4, 40)]));
        assert_eq!(plan.remove, map(&[(1, 10)]));
        assert_eq!(plan.update, map(&[(2, 21)]));
        assert_eq!(plan.noop, map(&[(3, 30)]));
        assert_eq!(plan.mutation_count(), 3);
    }

    #[test]
    fn identical_tables_converge() {
        bolero::check!()
            .with_type()
            .for_each(|pairs: &Vec<(u8, u8)>| {
                let table: HashMap<u8, u8> = pairs.iter().copied().collect();
                let plan = diff(&table, &table);
                assert!(plan.is_converged());
                assert_eq!(plan.noop, table);
            });
    }

    #[test]
    fn applying_the_plan_yields_the_desired_table() {
        bolero::check!().with_type().for_each(
            |(old_pairs, new_pairs): &(Vec<(u8, u8)>, Vec<(u8, u8)>)| {
                let old: HashMap<u8, u8> = old_pairs.iter().copied().collect();
                let new: HashMap<u8, u8> = new_pairs.iter().copied().collect();
                let plan = diff(&old, &new);
                assert_eq!(apply(&old, &plan), new);
                // a second diff after application is all-noop
                assert!(diff(&apply(&old, &plan), &new).is_converged());
            },
        );
    }
}
