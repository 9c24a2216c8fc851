//! Read-only graph analysis: cycles, chains and a text rendering.

use crate::dag::scheduler::DependencyScheduler;
use std::collections::{HashSet, VecDeque};

impl DependencyScheduler {
    /// Every cycle in the `blocked_by` graph.
    ///
    /// Each cycle is the DFS path slice from the revisited node to the node
    /// that closed the loop, followed by the revisited node again
    /// (`["a", "b", "a"]`). An acyclic graph yields an empty list.
    pub fn detect_circular_dependencies(&self) -> Vec<Vec<String>> {
        let mut cycles = Vec::new();
        let mut visited = HashSet::new();
        let mut on_stack = HashSet::new();
        let mut path = Vec::new();

        for node in self.nodes() {
            if !visited.contains(node.id.as_str()) {
                self.find_cycles(
                    &node.id,
                    &mut visited,
                    &mut on_stack,
                    &mut path,
                    &mut cycles,
                );
            }
        }
        cycles
    }

    fn find_cycles<'a>(
        &'a self,
        id: &'a str,
        visited: &mut HashSet<&'a str>,
        on_stack: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        if on_stack.contains(id) {
            if let Some(start) = path.iter().position(|p| *p == id) {
                let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(id.to_string());
                cycles.push(cycle);
            }
            return;
        }
        if !visited.insert(id) {
            return;
        }
        let Some(node) = self.node(id) else {
            return;
        };

        on_stack.insert(id);
        path.push(id);
        for blocker in &node.blocked_by {
            if self.node(blocker).is_some() {
                self.find_cycles(blocker, visited, on_stack, path, cycles);
            }
        }
        path.pop();
        on_stack.remove(id);
    }

    /// Transitive blockers of `id`, each after its own blockers.
    pub fn dependency_chain(&self, id: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        seen.insert(id.to_string());
        if let Some(node) = self.node(id) {
            for blocker in &node.blocked_by {
                self.collect_blockers(blocker, &mut seen, &mut chain);
            }
        }
        chain
    }

    fn collect_blockers(&self, id: &str, seen: &mut HashSet<String>, chain: &mut Vec<String>) {
        if !seen.insert(id.to_string()) {
            return;
        }
        let Some(node) = self.node(id) else {
            return;
        };
        for blocker in &node.blocked_by {
            self.collect_blockers(blocker, seen, chain);
        }
        chain.push(id.to_string());
    }

    /// Every node that transitively waits on `id`, nearest first.
    pub fn dependent_chain(&self, id: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        seen.insert(id.to_string());
        let mut queue: VecDeque<String> = self
            .node(id)
            .map(|n| n.blocks.iter().cloned().collect())
            .unwrap_or_default();

        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.clone()) {
                continue;
            }
            if let Some(node) = self.node(&next) {
                queue.extend(node.blocks.iter().cloned());
            }
            chain.push(next);
        }
        chain
    }

    /// One line per node in topological order with its status icon.
    pub fn visualize(&self) -> String {
        let mut lines = Vec::with_capacity(self.len());
        for id in self.topological_order() {
            let Some(node) = self.node(&id) else {
                continue;
            };
            let mut line = format!("{} {}: {}", node.status.icon(), node.id, node.title);
            if !node.blocked_by.is_empty() {
                line.push_str(&format!(" (after: {})", node.blocked_by.join(", ")));
            }
            lines.push(line);
        }
        lines.join("\n")
    }
}

/// Render a cycle as `a → b → a`.
pub fn format_cycle(cycle: &[String]) -> String {
    cycle.join(" \u{2192} ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::Story;

    fn story(id: &str, deps: &[&str]) -> Story {
        Story::new(id, format!("Story {}", id)).with_blocked_by(deps)
    }

    #[test]
    fn test_acyclic_graph_has_no_cycles() {
        let s = DependencyScheduler::from_stories(&[
            story("a", &[]),
            story("b", &["a"]),
            story("c", &["a", "b"]),
        ]);
        assert!(s.detect_circular_dependencies().is_empty());
    }

    #[test]
    fn test_detects_three_cycle() {
        let s = DependencyScheduler::from_stories(&[
            story("a", &["c"]),
            story("b", &["a"]),
            story("c", &["b"]),
        ]);
        let cycles = s.detect_circular_dependencies();
        assert_eq!(cycles, vec![vec!["a", "c", "b", "a"]]);
        assert_eq!(format_cycle(&cycles[0]), "a → c → b → a");
    }

    #[test]
    fn test_detects_every_cycle() {
        let s = DependencyScheduler::from_stories(&[
            story("a", &["b"]),
            story("b", &["a"]),
            story("c", &["d"]),
            story("d", &["c"]),
            story("e", &[]),
        ]);
        assert_eq!(s.detect_circular_dependencies().len(), 2);
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let s = DependencyScheduler::from_stories(&[story("a", &["a"])]);
        assert_eq!(s.detect_circular_dependencies(), vec![vec!["a", "a"]]);
    }

    #[test]
    fn test_dependency_and_dependent_chains() {
        let s = DependencyScheduler::from_stories(&[
            story("schema", &[]),
            story("api", &["schema"]),
            story("web", &["api"]),
            story("e2e", &["web", "api"]),
        ]);
        assert_eq!(s.dependency_chain("e2e"), vec!["schema", "api", "web"]);
        assert!(s.dependency_chain("schema").is_empty());
        assert_eq!(s.dependent_chain("schema"), vec!["api", "web", "e2e"]);
        assert!(s.dependent_chain("e2e").is_empty());
    }

    #[test]
    fn test_visualize() {
        let mut s = DependencyScheduler::from_stories(&[story("1", &[]), story("2", &["1"])]);
        s.mark_complete("1");
        let text = s.visualize();
        assert_eq!(
            text,
            "\u{2705} 1: Story 1\n\u{1F4CB} 2: Story 2 (after: 1)"
        );
    }
}
