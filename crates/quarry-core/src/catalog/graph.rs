//! Entity dependency graph over foreign-key edges.

use std::collections::{BTreeSet, VecDeque};

/// Directed graph of entities; an edge `a -> b` means rows of `a` hold a
/// foreign key to rows of `b`.
#[derive(Debug, Default)]
pub(crate) struct DependencyGraph {
    nodes: Vec<String>,
    edges: Vec<Vec<usize>>,
}

impl DependencyGraph {
    pub(crate) fn new(nodes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let nodes: Vec<String> = nodes.into_iter().map(Into::into).collect();
        let edges = vec![Vec::new(); nodes.len()];
        Self { nodes, edges }
    }

    fn index(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n == name)
    }

    pub(crate) fn add_edge(&mut self, from: &str, to: &str) {
        if let (Some(a), Some(b)) = (self.index(from), self.index(to)) {
            if !self.edges[a].contains(&b) {
                self.edges[a].push(b);
            }
        }
    }

    /// Find one cycle, returned as the entity path that closes it.
    pub(crate) fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Active,
            Done,
        }

        fn visit(
            graph: &DependencyGraph,
            node: usize,
            marks: &mut [Mark],
            stack: &mut Vec<usize>,
        ) -> Option<Vec<String>> {
            marks[node] = Mark::Active;
            stack.push(node);
            for &next in &graph.edges[node] {
                match marks[next] {
                    Mark::Active => {
                        let start = stack.iter().position(|&n| n == next).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            stack[start..].iter().map(|&n| graph.nodes[n].clone()).collect();
                        cycle.push(graph.nodes[next].clone());
                        return Some(cycle);
                    }
                    Mark::New => {
                        if let Some(cycle) = visit(graph, next, marks, stack) {
                            return Some(cycle);
                        }
                    }
                    Mark::Done => {}
                }
            }
            stack.pop();
            marks[node] = Mark::Done;
            None
        }

        let mut marks = vec![Mark::New; self.nodes.len()];
        let mut stack = Vec::new();
        for node in 0..self.nodes.len() {
            if marks[node] == Mark::New {
                if let Some(cycle) = visit(self, node, &mut marks, &mut stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    /// Order nodes so every node precedes the nodes it points to.
    ///
    /// Self-loops are ignored. Nodes left on a cycle are appended in
    /// declaration order.
    pub(crate) fn topological_order(&self) -> Vec<String> {
        let n = self.nodes.len();
        let mut in_degree = vec![0usize; n];
        for (from, targets) in self.edges.iter().enumerate() {
            for &to in targets {
                if to != from {
                    in_degree[to] += 1;
                }
            }
        }

        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        let mut placed = BTreeSet::new();
        while let Some(node) = queue.pop_front() {
            order.push(node);
            placed.insert(node);
            for &to in &self.edges[node] {
                if to == node {
                    continue;
                }
                in_degree[to] -= 1;
                if in_degree[to] == 0 {
                    queue.push_back(to);
                }
            }
        }
        order.extend((0..n).filter(|i| !placed.contains(i)));
        order.into_iter().map(|i| self.nodes[i].clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acyclic_order() {
        let mut graph = DependencyGraph::new(["Project", "Floorplan", "Model3D"]);
        graph.add_edge("Floorplan", "Project");
        graph.add_edge("Model3D", "Floorplan");

        assert!(graph.find_cycle().is_none());
        assert_eq!(
            graph.topological_order(),
            vec!["Model3D", "Floorplan", "Project"]
        );
    }

    #[test]
    fn test_cycle_detected() {
        let mut graph = DependencyGraph::new(["A", "B", "C"]);
        graph.add_edge("A", "B");
        graph.add_edge("B", "C");
        graph.add_edge("C", "A");

        let cycle = graph.find_cycle().unwrap();
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
        assert_eq!(graph.topological_order().len(), 3);
    }

    #[test]
    fn test_self_loop() {
        let mut graph = DependencyGraph::new(["Employee"]);
        graph.add_edge("Employee", "Employee");

        assert_eq!(graph.find_cycle().unwrap(), vec!["Employee", "Employee"]);
        assert_eq!(graph.topological_order(), vec!["Employee"]);
    }
}
