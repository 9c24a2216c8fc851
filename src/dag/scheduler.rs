//! Dependency scheduler: picks the next runnable story and keeps readiness current.
//!
//! Readiness is maintained incrementally. `mark_complete` only re-checks the
//! nodes the completed node blocks, via the eagerly maintained inverse edges.

use crate::dag::node::{DependencyNode, GraphProgress, NodeStatus};
use crate::feature::Story;
use std::collections::HashMap;

/// The scheduler owns one mapping from story id to node.
#[derive(Debug, Clone, Default)]
pub struct DependencyScheduler {
    /// Nodes in insertion order
    nodes: Vec<DependencyNode>,
    /// Map from story id to position in `nodes`
    index: HashMap<String, usize>,
}

impl DependencyScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a scheduler from a flat story list.
    pub fn from_stories(stories: &[Story]) -> Self {
        let mut scheduler = Self::new();
        scheduler.build_from_stories(stories);
        scheduler
    }

    /// Rebuild the graph wholesale from a story list.
    ///
    /// Nodes are seeded from story status, inverse edges are filled in from
    /// every `blocked_by` list, then readiness is computed for every node that
    /// is not complete, in progress or blocked.
    pub fn build_from_stories(&mut self, stories: &[Story]) {
        self.nodes.clear();
        self.index.clear();

        for story in stories {
            if self.index.contains_key(&story.id) {
                continue;
            }
            let mut node = DependencyNode::new(
                story.id.clone(),
                story.title.clone(),
                NodeStatus::seed(story.status),
            );
            node.blocked_by = story.blocked_by.clone();
            self.index.insert(story.id.clone(), self.nodes.len());
            self.nodes.push(node);
        }

        for i in 0..self.nodes.len() {
            let id = self.nodes[i].id.clone();
            let blockers = self.nodes[i].blocked_by.clone();
            for blocker in blockers {
                if let Some(&b) = self.index.get(&blocker) {
                    self.nodes[b].blocks.push(id.clone());
                }
            }
        }

        for i in 0..self.nodes.len() {
            self.refresh(i);
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&DependencyNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// All nodes in insertion order.
    pub fn nodes(&self) -> &[DependencyNode] {
        &self.nodes
    }

    /// Whether every blocker of the node at `i` exists and is complete.
    fn blockers_complete(&self, i: usize) -> bool {
        self.nodes[i].blocked_by.iter().all(|b| {
            self.index
                .get(b)
                .is_some_and(|&bi| self.nodes[bi].status == NodeStatus::Complete)
        })
    }

    fn refresh(&mut self, i: usize) {
        if self.nodes[i].status.is_settled() {
            return;
        }
        self.nodes[i].status = if self.blockers_complete(i) {
            NodeStatus::Ready
        } else {
            NodeStatus::Pending
        };
    }

    /// Ids in dependency order: every node after all of its blockers.
    ///
    /// Depth-first postorder over `blocked_by`. A node already on the recursion
    /// stack is not re-entered, so cycles terminate but their members come out
    /// in arbitrary relative order.
    pub fn topological_order(&self) -> Vec<String> {
        let mut visited = vec![false; self.nodes.len()];
        let mut on_stack = vec![false; self.nodes.len()];
        let mut order = Vec::with_capacity(self.nodes.len());

        for i in 0..self.nodes.len() {
            self.visit(i, &mut visited, &mut on_stack, &mut order);
        }
        order
    }

    fn visit(
        &self,
        i: usize,
        visited: &mut [bool],
        on_stack: &mut [bool],
        order: &mut Vec<String>,
    ) {
        if visited[i] || on_stack[i] {
            return;
        }
        on_stack[i] = true;
        for blocker in &self.nodes[i].blocked_by {
            if let Some(&b) = self.index.get(blocker) {
                self.visit(b, visited, on_stack, order);
            }
        }
        on_stack[i] = false;
        visited[i] = true;
        order.push(self.nodes[i].id.clone());
    }

    /// First ready node in topological order.
    pub fn get_next_story(&self) -> Option<&DependencyNode> {
        self.topological_order()
            .iter()
            .filter_map(|id| self.node(id))
            .find(|n| n.status == NodeStatus::Ready)
    }

    /// Every ready node, in topological order.
    pub fn ready_stories(&self) -> Vec<&DependencyNode> {
        self.topological_order()
            .iter()
            .filter_map(|id| self.node(id))
            .filter(|n| n.status == NodeStatus::Ready)
            .collect()
    }

    /// Move a ready node to in progress. Returns false otherwise.
    pub fn mark_in_progress(&mut self, id: &str) -> bool {
        match self.index.get(id) {
            Some(&i) if self.nodes[i].status == NodeStatus::Ready => {
                self.nodes[i].status = NodeStatus::InProgress;
                true
            }
            _ => false,
        }
    }

    /// Complete a node and return the ids that became ready as a result.
    pub fn mark_complete(&mut self, id: &str) -> Vec<String> {
        let Some(&i) = self.index.get(id) else {
            return Vec::new();
        };
        self.nodes[i].status = NodeStatus::Complete;

        let mut unblocked = Vec::new();
        for dependent in self.nodes[i].blocks.clone() {
            let Some(&d) = self.index.get(&dependent) else {
                continue;
            };
            if self.nodes[d].status == NodeStatus::Pending && self.blockers_complete(d) {
                self.nodes[d].status = NodeStatus::Ready;
                unblocked.push(dependent);
            }
        }
        unblocked
    }

    /// Block a node until it is reset.
    pub fn mark_blocked(&mut self, id: &str) -> bool {
        match self.index.get(id) {
            Some(&i) => {
                self.nodes[i].status = NodeStatus::Blocked;
                true
            }
            None => false,
        }
    }

    /// Insert a node mid-run. Its status follows its blockers' current state.
    ///
    /// Returns `None` if the id is already taken.
    pub fn add_node(
        &mut self,
        id: &str,
        title: &str,
        blocked_by: Vec<String>,
    ) -> Option<NodeStatus> {
        if self.index.contains_key(id) {
            return None;
        }
        for blocker in &blocked_by {
            if let Some(&b) = self.index.get(blocker) {
                self.nodes[b].blocks.push(id.to_string());
            }
        }
        let mut node = DependencyNode::new(id, title, NodeStatus::Pending);
        node.blocked_by = blocked_by;
        let i = self.nodes.len();
        self.index.insert(id.to_string(), i);
        self.nodes.push(node);
        self.refresh(i);
        Some(self.nodes[i].status)
    }

    /// Drop every blocker of a node so it can run next.
    pub fn clear_dependencies(&mut self, id: &str) -> bool {
        let Some(&i) = self.index.get(id) else {
            return false;
        };
        for blocker in std::mem::take(&mut self.nodes[i].blocked_by) {
            if let Some(&b) = self.index.get(&blocker) {
                self.nodes[b].blocks.retain(|d| d != id);
            }
        }
        if !matches!(
            self.nodes[i].status,
            NodeStatus::Complete | NodeStatus::InProgress
        ) {
            self.nodes[i].status = NodeStatus::Ready;
        }
        true
    }

    /// Return a node to ready or pending based on its blockers.
    pub fn reset_story(&mut self, id: &str) -> Option<NodeStatus> {
        let &i = self.index.get(id)?;
        self.nodes[i].status = if self.blockers_complete(i) {
            NodeStatus::Ready
        } else {
            NodeStatus::Pending
        };
        Some(self.nodes[i].status)
    }

    /// Node counts per status.
    pub fn progress(&self) -> GraphProgress {
        let mut progress = GraphProgress {
            total: self.nodes.len(),
            ..Default::default()
        };
        for node in &self.nodes {
            match node.status {
                NodeStatus::Complete => progress.complete += 1,
                NodeStatus::InProgress => progress.in_progress += 1,
                NodeStatus::Ready => progress.ready += 1,
                NodeStatus::Pending => progress.pending += 1,
                NodeStatus::Blocked => progress.blocked += 1,
            }
        }
        progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::StoryStatus;

    fn story(id: &str, deps: &[&str]) -> Story {
        Story::new(id, format!("Story {}", id)).with_blocked_by(deps)
    }

    fn status(s: &DependencyScheduler, id: &str) -> NodeStatus {
        s.node(id).unwrap().status
    }

    #[test]
    fn test_build_seeds_and_readiness() {
        let stories = vec![
            story("a", &[]),
            story("b", &["a"]),
            story("c", &[]).with_status(StoryStatus::Complete),
            story("d", &["c"]),
            story("e", &[]).with_status(StoryStatus::Blocked),
            story("f", &[]).with_status(StoryStatus::InProgress),
        ];
        let s = DependencyScheduler::from_stories(&stories);

        assert_eq!(status(&s, "a"), NodeStatus::Ready);
        assert_eq!(status(&s, "b"), NodeStatus::Pending);
        assert_eq!(status(&s, "c"), NodeStatus::Complete);
        assert_eq!(status(&s, "d"), NodeStatus::Ready);
        assert_eq!(status(&s, "e"), NodeStatus::Blocked);
        assert_eq!(status(&s, "f"), NodeStatus::InProgress);
        assert_eq!(s.node("a").unwrap().blocks, vec!["b"]);
    }

    #[test]
    fn test_topological_order_respects_transitive_blockers() {
        let stories = vec![
            story("deploy", &["api", "web"]),
            story("web", &["schema"]),
            story("api", &["schema"]),
            story("schema", &[]),
            story("docs", &["deploy"]),
        ];
        let s = DependencyScheduler::from_stories(&stories);
        let order = s.topological_order();
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();

        assert_eq!(order.len(), 5);
        for st in &stories {
            for blocker in &st.blocked_by {
                assert!(pos(blocker) < pos(&st.id), "{} before {}", blocker, st.id);
            }
        }
        assert!(pos("schema") < pos("docs"));
    }

    #[test]
    fn test_next_story_follows_insertion_order_among_ready() {
        let stories = vec![story("A", &[]), story("B", &["A"]), story("C", &["A"])];
        let mut s = DependencyScheduler::from_stories(&stories);

        assert_eq!(s.get_next_story().unwrap().id, "A");
        assert!(s.mark_in_progress("A"));
        assert!(s.get_next_story().is_none());

        let unblocked = s.mark_complete("A");
        assert_eq!(unblocked, vec!["B", "C"]);
        assert_eq!(s.get_next_story().unwrap().id, "B");
        assert_eq!(s.ready_stories().len(), 2);
    }

    #[test]
    fn test_mark_in_progress_only_from_ready() {
        let mut s = DependencyScheduler::from_stories(&[story("a", &[]), story("b", &["a"])]);
        assert!(!s.mark_in_progress("b"));
        assert!(!s.mark_in_progress("missing"));
        assert!(s.mark_in_progress("a"));
        assert!(!s.mark_in_progress("a"));
    }

    #[test]
    fn test_mark_complete_requires_every_blocker() {
        let stories = vec![story("a", &[]), story("b", &[]), story("c", &["a", "b"])];
        let mut s = DependencyScheduler::from_stories(&stories);

        assert!(s.mark_complete("a").is_empty());
        assert_eq!(status(&s, "c"), NodeStatus::Pending);
        assert_eq!(s.mark_complete("b"), vec!["c"]);
        assert_eq!(status(&s, "c"), NodeStatus::Ready);
    }

    #[test]
    fn test_mark_complete_leaves_settled_dependents_alone() {
        let stories = vec![
            story("a", &[]),
            story("b", &["a"]).with_status(StoryStatus::InProgress),
            story("c", &["a"]).with_status(StoryStatus::Complete),
            story("d", &["a"]).with_status(StoryStatus::Blocked),
        ];
        let mut s = DependencyScheduler::from_stories(&stories);
        let unblocked = s.mark_complete("a");

        assert!(unblocked.is_empty());
        assert_eq!(status(&s, "b"), NodeStatus::InProgress);
        assert_eq!(status(&s, "c"), NodeStatus::Complete);
        assert_eq!(status(&s, "d"), NodeStatus::Blocked);
    }

    #[test]
    fn test_unknown_blocker_keeps_node_pending() {
        let s = DependencyScheduler::from_stories(&[story("a", &["ghost"])]);
        assert_eq!(status(&s, "a"), NodeStatus::Pending);
        assert!(s.get_next_story().is_none());
    }

    #[test]
    fn test_cycle_terminates_topological_order() {
        let stories = vec![story("a", &["c"]), story("b", &["a"]), story("c", &["b"])];
        let s = DependencyScheduler::from_stories(&stories);
        let order = s.topological_order();
        assert_eq!(order.len(), 3);
        assert!(s.get_next_story().is_none());
    }

    #[test]
    fn test_add_node_status_from_current_blockers() {
        let mut s = DependencyScheduler::from_stories(&[story("a", &[]), story("b", &[])]);
        s.mark_complete("a");

        assert_eq!(s.add_node("c", "C", vec!["a".to_string()]), Some(NodeStatus::Ready));
        assert_eq!(s.add_node("d", "D", vec!["b".to_string()]), Some(NodeStatus::Pending));
        assert_eq!(s.add_node("d", "dup", vec![]), None);

        assert_eq!(s.mark_complete("b"), vec!["d"]);
        assert_eq!(s.len(), 4);
    }

    #[test]
    fn test_clear_dependencies_makes_ready() {
        let mut s = DependencyScheduler::from_stories(&[
            story("a", &[]),
            story("b", &["a"]),
            story("c", &[]).with_status(StoryStatus::Blocked),
        ]);

        assert!(s.clear_dependencies("b"));
        assert_eq!(status(&s, "b"), NodeStatus::Ready);
        assert!(s.node("b").unwrap().blocked_by.is_empty());
        assert!(s.node("a").unwrap().blocks.is_empty());

        assert!(s.clear_dependencies("c"));
        assert_eq!(status(&s, "c"), NodeStatus::Ready);
        assert!(!s.clear_dependencies("missing"));
    }

    #[test]
    fn test_reset_story() {
        let mut s = DependencyScheduler::from_stories(&[story("a", &[]), story("b", &["a"])]);
        s.mark_in_progress("a");
        s.mark_blocked("a");
        assert_eq!(s.reset_story("a"), Some(NodeStatus::Ready));

        s.mark_blocked("b");
        assert_eq!(s.reset_story("b"), Some(NodeStatus::Pending));
        assert_eq!(s.reset_story("missing"), None);
    }

    #[test]
    fn test_progress_counts() {
        let mut s = DependencyScheduler::from_stories(&[
            story("a", &[]),
            story("b", &["a"]),
            story("c", &[]),
            story("d", &[]),
        ]);
        s.mark_in_progress("c");
        s.mark_blocked("d");
        s.mark_complete("a");

        let progress = s.progress();
        assert_eq!(progress.total, 4);
        assert_eq!(progress.complete, 1);
        assert_eq!(progress.ready, 1);
        assert_eq!(progress.in_progress, 1);
        assert_eq!(progress.blocked, 1);
        assert_eq!(progress.pending, 0);
    }
}
