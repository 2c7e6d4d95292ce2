//! Near-duplicate clustering within one pool.
//!
//! Every entry is linked to those of its `k` nearest neighbors scoring at or
//! above the threshold; clusters are the connected components of the
//! resulting undirected graph. Neighbor queries run on the rayon pool.
use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use super::ensure_current;
use super::index::SimilarityIndex;
use crate::dictionary::{Pool, PoolKind};
use crate::error::{Result, Threshold};
use crate::progress::{Job, Stage};

/// A group of entries that are near-duplicates of each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cluster {
    pub pool: PoolKind,
    /// Pool rows, ascending.
    pub members: Vec<usize>,
    /// Best-connected member; shortest key, then lowest row, on ties.
    pub representative: usize,
}

impl Cluster {
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    #[must_use]
    pub fn is_singleton(&self) -> bool {
        self.members.len() == 1
    }
}

/// Partition `pool` into clusters. Every row lands in exactly one cluster;
/// isolated rows form singletons. Clusters are ordered by their lowest row.
pub fn build_clusters(
    pool: &Pool,
    index: &SimilarityIndex,
    threshold: Threshold,
    k: usize,
    job: Job<'_>,
) -> Result<Vec<Cluster>> {
    ensure_current(pool, index)?;
    let n = pool.len();
    let reporter = job.reporter(Stage::Clustering, n);

    let neighbors: Vec<Vec<usize>> = (0..n)
        .into_par_iter()
        .map(|i| -> Result<Vec<usize>> {
            job.cancel.check()?;
            let hits = index.query_excluding(pool.vector(i), k, i)?;
            reporter.advance(1);
            Ok(hits
                .into_iter()
                .filter(|h| threshold.accepts(h.score))
                .map(|h| h.index)
                .collect())
        })
        .collect::<Result<_>>()?;
    reporter.finish();

    // symmetrize
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, list) in neighbors.iter().enumerate() {
        for &j in list {
            adjacency[i].push(j);
            adjacency[j].push(i);
        }
    }
    for list in &mut adjacency {
        list.sort_unstable();
        list.dedup();
    }

    let mut visited = vec![false; n];
    let mut clusters = Vec::new();
    let mut stack = Vec::new();
    for start in 0..n {
        if visited[start] {
            continue;
        }
        visited[start] = true;
        stack.push(start);
        let mut members = Vec::new();
        while let Some(node) = stack.pop() {
            members.push(node);
            for &next in &adjacency[node] {
                if !visited[next] {
                    visited[next] = true;
                    stack.push(next);
                }
            }
        }
        members.sort_unstable();
        let representative = pick_representative(pool, &adjacency, &members);
        clusters.push(Cluster {
            pool: pool.kind(),
            members,
            representative,
        });
    }

    info!(
        "{} pool: {} entries in {} clusters ({} multi-member)",
        pool.kind(),
        n,
        clusters.len(),
        clusters.iter().filter(|c| !c.is_singleton()).count()
    );
    Ok(clusters)
}

fn pick_representative(pool: &Pool, adjacency: &[Vec<usize>], members: &[usize]) -> usize {
    let key_len = |i: usize| pool.entry(i).key().chars().count();
    members
        .iter()
        .copied()
        .max_by(|&a, &b| {
            adjacency[a]
                .len()
                .cmp(&adjacency[b].len())
                .then(key_len(b).cmp(&key_len(a)))
                .then(b.cmp(&a))
        })
        .unwrap_or_default()
}
