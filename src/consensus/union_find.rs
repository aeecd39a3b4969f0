//! Grouping of pending transactions that touch the same accounts.

use std::collections::BTreeMap;

use crate::types::{Address, SignedTransaction};

/// Disjoint sets over `0..len` with path halving and union by size
#[derive(Clone, Debug)]
pub struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    /// `len` singleton sets
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            size: vec![1; len],
        }
    }

    /// Representative of the set containing `index`
    pub fn find(&mut self, mut index: usize) -> usize {
        while self.parent[index] != index {
            self.parent[index] = self.parent[self.parent[index]];
            index = self.parent[index];
        }
        index
    }

    /// Merge the sets containing `a` and `b`
    pub fn union(&mut self, a: usize, b: usize) {
        let (mut a, mut b) = (self.find(a), self.find(b));
        if a == b {
            return;
        }
        if self.size[a] < self.size[b] {
            std::mem::swap(&mut a, &mut b);
        }
        self.parent[b] = a;
        self.size[a] += self.size[b];
    }

    /// Members of every set, each sorted, sets ordered by smallest member
    pub fn groups(&mut self) -> Vec<Vec<usize>> {
        let mut by_root: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for index in 0..self.parent.len() {
            let root = self.find(index);
            by_root.entry(root).or_default().push(index);
        }
        let mut groups: Vec<Vec<usize>> = by_root.into_values().collect();
        groups.sort_by_key(|group| group[0]);
        groups
    }
}

/// Partition transactions so that any two sharing a participant end up in
/// the same group, transitively
#[must_use]
pub fn group_by_participants(transactions: &[SignedTransaction]) -> Vec<Vec<usize>> {
    let mut sets = UnionFind::new(transactions.len());
    let mut first_seen: BTreeMap<Address, usize> = BTreeMap::new();
    for (index, transaction) in transactions.iter().enumerate() {
        for participant in transaction.transaction.action.participants() {
            match first_seen.get(&participant) {
                Some(&other) => sets.union(index, other),
                None => {
                    first_seen.insert(participant, index);
                }
            }
        }
    }
    sets.groups()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{keypair, transfer_tx};

    #[test]
    fn test_union_find_merges_transitively() {
        let mut sets = UnionFind::new(5);
        sets.union(0, 1);
        sets.union(3, 4);
        sets.union(1, 4);
        assert_eq!(sets.groups(), vec![vec![0, 1, 3, 4], vec![2]]);
    }

    #[test]
    fn test_transactions_grouped_by_shared_accounts() {
        let txs = vec![
            transfer_tx(&keypair(1), &keypair(2), 1, 0),
            transfer_tx(&keypair(3), &keypair(4), 1, 0),
            transfer_tx(&keypair(2), &keypair(5), 1, 0),
            transfer_tx(&keypair(6), &keypair(7), 1, 0),
            transfer_tx(&keypair(7), &keypair(3), 1, 0),
        ];
        assert_eq!(group_by_participants(&txs), vec![vec![0, 2], vec![1, 3, 4]]);
    }
}
