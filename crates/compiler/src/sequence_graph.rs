//! Sequence dependency graph
//!
//! A sequence that embeds another sequence depends on it: the embedded one
//! must be known (and ordered) first. This module builds that graph, rejects
//! cycles, and linearizes it.
//!
//! # Usage
//!
//! ```ignore
//! let mut sequences = manifest_sequences();
//! sort_sequences(&mut sequences)?;   // embedded sequences now come first
//! ```
//!
//! # Implementation Details
//!
//! - **Nodes**: one per sequence, addressed by its index in the input slice
//! - **Edges**: `S -> T` for every `Command::Sequence(T)` inside `S`,
//!   resolved by name; duplicates collapse to one edge
//! - **Traversal**: iterative DFS with an explicit frame stack, so deep
//!   sequence chains cannot overflow the call stack
//! - **Order**: post-order finish order; every embedded sequence finishes
//!   before the sequence embedding it
//! - **Verification**: the computed order is re-checked edge by edge before
//!   anything is reordered

use panel_core::{Error, Result, Sequence};
use std::collections::HashMap;
use tracing::debug;

/// Dependency graph over a set of sequences
#[derive(Debug, Clone)]
pub struct SequenceGraph {
    names: Vec<String>,
    /// `edges[s]` lists the sequences `s` embeds, in first-reference order
    edges: Vec<Vec<usize>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnPath,
    Done,
}

impl SequenceGraph {
    /// Build the graph, resolving every embedded sequence by name.
    pub fn build(sequences: &[Sequence]) -> Result<Self> {
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(sequences.len());
        for (i, seq) in sequences.iter().enumerate() {
            if index.insert(seq.name.as_str(), i).is_some() {
                return Err(Error::DuplicateSequence(seq.name.clone()));
            }
        }

        let mut edges = Vec::with_capacity(sequences.len());
        for seq in sequences {
            let mut targets: Vec<usize> = Vec::new();
            for target in seq.embedded_sequences() {
                let Some(&t) = index.get(target) else {
                    return Err(Error::UnresolvedReference {
                        sequence: seq.name.clone(),
                        target: target.to_string(),
                    });
                };
                if !targets.contains(&t) {
                    targets.push(t);
                }
            }
            edges.push(targets);
        }

        Ok(SequenceGraph {
            names: sequences.iter().map(|s| s.name.clone()).collect(),
            edges,
        })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.iter().map(Vec::len).sum()
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Sequences embedded directly by `name`.
    pub fn dependencies(&self, name: &str) -> Option<Vec<&str>> {
        let i = self.index_of(name)?;
        Some(self.edges[i].iter().map(|&t| self.names[t].as_str()).collect())
    }

    /// Sequences that directly embed `name`.
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        let Some(target) = self.index_of(name) else {
            return Vec::new();
        };
        self.edges
            .iter()
            .enumerate()
            .filter(|(_, targets)| targets.contains(&target))
            .map(|(s, _)| self.names[s].as_str())
            .collect()
    }

    pub fn is_cyclic(&self) -> bool {
        self.find_cycle().is_some()
    }

    /// Find one cycle, returned as a closed path of indices (first == last).
    pub fn find_cycle(&self) -> Option<Vec<usize>> {
        let mut marks = vec![Mark::Unvisited; self.len()];
        for root in 0..self.len() {
            if marks[root] != Mark::Unvisited {
                continue;
            }
            // (node, next edge to follow)
            let mut frames: Vec<(usize, usize)> = vec![(root, 0)];
            marks[root] = Mark::OnPath;

            while let Some(frame) = frames.last_mut() {
                let node = frame.0;
                if let Some(&target) = self.edges[node].get(frame.1) {
                    frame.1 += 1;
                    match marks[target] {
                        Mark::Unvisited => {
                            marks[target] = Mark::OnPath;
                            frames.push((target, 0));
                        }
                        Mark::OnPath => {
                            let start = frames.iter().position(|&(n, _)| n == target)?;
                            let mut path: Vec<usize> =
                                frames[start..].iter().map(|&(n, _)| n).collect();
                            path.push(target);
                            return Some(path);
                        }
                        Mark::Done => {}
                    }
                } else {
                    marks[node] = Mark::Done;
                    frames.pop();
                }
            }
        }
        None
    }

    /// Post-order DFS topological sort.
    ///
    /// Each node is pushed onto the finish stack once all of its embedded
    /// sequences have finished, so reading the stack from the bottom yields
    /// dependencies before dependents. Input order breaks ties.
    pub fn topological_order(&self) -> Result<Vec<usize>> {
        if let Some(cycle) = self.find_cycle() {
            return Err(self.cycle_error(&cycle));
        }

        let mut visited = vec![false; self.len()];
        let mut finished: Vec<usize> = Vec::with_capacity(self.len());

        for root in 0..self.len() {
            if visited[root] {
                continue;
            }
            visited[root] = true;
            let mut frames: Vec<(usize, usize)> = vec![(root, 0)];

            while let Some(frame) = frames.last_mut() {
                let node = frame.0;
                if let Some(&target) = self.edges[node].get(frame.1) {
                    frame.1 += 1;
                    if !visited[target] {
                        visited[target] = true;
                        frames.push((target, 0));
                    }
                } else {
                    finished.push(node);
                    frames.pop();
                }
            }
        }

        Ok(finished)
    }

    /// Verify that every embedded sequence precedes its embedder in `order`.
    ///
    /// A failure means the sort itself is broken; it is reported instead of
    /// being silently accepted.
    pub fn check_order(&self, order: &[usize]) -> Result<()> {
        let mut position = vec![usize::MAX; self.len()];
        for (pos, &node) in order.iter().enumerate() {
            if let Some(slot) = position.get_mut(node) {
                *slot = pos;
            }
        }

        for (source, targets) in self.edges.iter().enumerate() {
            for &target in targets {
                if position[source] == usize::MAX || position[target] >= position[source] {
                    return Err(Error::OrderViolation {
                        from: self.names[source].clone(),
                        to: self.names[target].clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn cycle_error(&self, cycle: &[usize]) -> Error {
        Error::CycleDetected {
            path: cycle.iter().map(|&i| self.names[i].clone()).collect(),
        }
    }
}

/// Reorder `sequences` so every embedded sequence precedes its embedders.
///
/// On any error (unknown reference, duplicate name, cycle, order check) the
/// vector is left exactly as it was.
pub fn sort_sequences(sequences: &mut Vec<Sequence>) -> Result<()> {
    let graph = SequenceGraph::build(sequences)?;
    if let Some(cycle) = graph.find_cycle() {
        return Err(graph.cycle_error(&cycle));
    }
    let order = graph.topological_order()?;
    graph.check_order(&order)?;

    let mut rank = vec![0usize; order.len()];
    for (pos, &node) in order.iter().enumerate() {
        rank[node] = pos;
    }

    let mut ranked: Vec<(usize, Sequence)> = std::mem::take(sequences)
        .into_iter()
        .enumerate()
        .map(|(i, seq)| (rank[i], seq))
        .collect();
    ranked.sort_by_key(|(r, _)| *r);
    *sequences = ranked.into_iter().map(|(_, seq)| seq).collect();

    debug!(
        sequences = graph.len(),
        edges = graph.edge_count(),
        "sorted sequence graph"
    );
    Ok(())
}
