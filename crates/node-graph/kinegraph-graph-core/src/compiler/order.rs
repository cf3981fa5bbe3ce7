//! Reachability, evaluation order and pose-buffer release scheduling.

use std::cmp::Reverse;

use super::bind::BoundNode;
use super::CompileError;
use crate::types::ValueType;

#[derive(Debug)]
pub(super) struct Schedule {
    /// Description indices in evaluation order. The root comes last.
    pub order: Vec<usize>,
    /// Description index -> evaluation index. Pruned nodes map to `usize::MAX`.
    pub position: Vec<usize>,
    /// Per evaluation index, the evaluation indices whose pose results drop afterwards.
    pub releases: Vec<Vec<usize>>,
    pub peak: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Active,
    Done,
}

struct Planner<'a> {
    nodes: &'a [BoundNode],
    max_depth: usize,
    marks: Vec<Mark>,
    /// Longest chain below and including the node.
    height: Vec<usize>,
    /// Pose buffers live at once while evaluating the node's subtree, its own included.
    need: Vec<usize>,
    /// Distinct producers in visiting order.
    children: Vec<Vec<usize>>,
}

impl<'a> Planner<'a> {
    fn new(nodes: &'a [BoundNode], max_depth: usize) -> Self {
        Self {
            nodes,
            max_depth,
            marks: vec![Mark::Unvisited; nodes.len()],
            height: vec![0; nodes.len()],
            need: vec![0; nodes.len()],
            children: vec![Vec::new(); nodes.len()],
        }
    }

    fn holds(&self, n: usize) -> usize {
        usize::from(self.nodes[n].op.acquires_pose())
    }

    fn too_deep(&self, n: usize) -> CompileError {
        CompileError::DepthExceeded {
            node: self.nodes[n].id.clone(),
            max_depth: self.max_depth,
        }
    }

    fn visit(&mut self, n: usize, depth: usize) -> Result<(), CompileError> {
        match self.marks[n] {
            Mark::Active => return Err(CompileError::Cycle(self.nodes[n].id.clone())),
            Mark::Done => {
                if depth + self.height[n] - 1 > self.max_depth {
                    return Err(self.too_deep(n));
                }
                return Ok(());
            }
            Mark::Unvisited => {}
        }
        if depth > self.max_depth {
            return Err(self.too_deep(n));
        }
        self.marks[n] = Mark::Active;

        let mut children: Vec<usize> = Vec::new();
        for &src in self.nodes[n].inputs.iter().flatten() {
            if !children.contains(&src) {
                children.push(src);
            }
        }
        for &child in &children {
            self.visit(child, depth + 1)?;
        }

        // Stable: ties keep slot order.
        children.sort_by_key(|&c| Reverse(self.need[c] - self.holds(c)));
        let mut held = 0;
        let mut need = 0;
        for &child in &children {
            need = need.max(held + self.need[child]);
            held += self.holds(child);
        }
        self.need[n] = need.max(held + self.holds(n));
        self.height[n] = 1 + children.iter().map(|&c| self.height[c]).max().unwrap_or(0);
        self.children[n] = children;
        self.marks[n] = Mark::Done;
        Ok(())
    }

    fn emit(&self, n: usize, emitted: &mut [bool], order: &mut Vec<usize>) {
        if emitted[n] {
            return;
        }
        emitted[n] = true;
        for &child in &self.children[n] {
            self.emit(child, emitted, order);
        }
        order.push(n);
    }
}

/// Order the nodes reachable from `root` and attach release points.
pub(super) fn schedule(
    nodes: &[BoundNode],
    root: usize,
    max_depth: usize,
) -> Result<Schedule, CompileError> {
    let mut planner = Planner::new(nodes, max_depth);
    planner.visit(root, 1)?;

    let mut order = Vec::new();
    let mut emitted = vec![false; nodes.len()];
    planner.emit(root, &mut emitted, &mut order);

    let mut position = vec![usize::MAX; nodes.len()];
    for (i, &n) in order.iter().enumerate() {
        position[n] = i;
    }

    let mut last_use: Vec<Option<usize>> = vec![None; order.len()];
    for (i, &n) in order.iter().enumerate() {
        for &src in nodes[n].inputs.iter().flatten() {
            last_use[position[src]] = Some(i);
        }
    }
    let output = order.len() - 1;
    let mut releases = vec![Vec::new(); order.len()];
    for (producer, consumer) in last_use.iter().enumerate() {
        if producer == output || nodes[order[producer]].output != ValueType::Pose {
            continue;
        }
        if let Some(consumer) = consumer {
            releases[*consumer].push(producer);
        }
    }

    let mut live = 0usize;
    let mut peak = 0usize;
    for (i, &n) in order.iter().enumerate() {
        if nodes[n].op.acquires_pose() {
            live += 1;
            peak = peak.max(live);
        }
        for &released in &releases[i] {
            if nodes[order[released]].op.acquires_pose() {
                live -= 1;
            }
        }
    }

    Ok(Schedule {
        order,
        position,
        releases,
        peak,
    })
}
