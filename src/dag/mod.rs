//! Dependency scheduling for stories.
//!
//! A feature's stories form a graph through their `blocked_by` lists. The
//! scheduler projects each story onto a [`DependencyNode`], keeps readiness
//! current as stories complete, and hands the run-loop one story at a time.
//!
//! ## Example
//!
//! ```no_run
//! use claw::dag::DependencyScheduler;
//! use claw::feature::Story;
//!
//! let stories = vec![
//!     Story::new("1", "Schema migration"),
//!     Story::new("2", "API endpoints").with_blocked_by(&["1"]),
//!     Story::new("3", "Web forms").with_blocked_by(&["1"]),
//! ];
//!
//! let mut scheduler = DependencyScheduler::from_stories(&stories);
//! let next = scheduler.get_next_story().map(|n| n.id.clone());
//! assert_eq!(next.as_deref(), Some("1"));
//!
//! scheduler.mark_in_progress("1");
//! // Both dependents become ready once "1" completes
//! assert_eq!(scheduler.mark_complete("1"), vec!["2", "3"]);
//! ```

mod analysis;
mod node;
mod scheduler;

pub use analysis::format_cycle;
pub use node::{DependencyNode, GraphProgress, NodeStatus};
pub use scheduler::DependencyScheduler;
