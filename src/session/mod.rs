//! Session orchestration: the run-loop, its mutable context, operator
//! interaction and the end-of-run summary.

pub mod context;
pub mod interrupts;
pub mod operator;
pub mod runner;
pub mod state;
pub mod summary;

pub use context::SessionContext;
pub use interrupts::{HotkeyListener, Interrupt, ListenerControl};
pub use operator::{HeadlessOperator, Operator, PivotAction, TerminalOperator};
pub use runner::{SessionRunner, reconcile_feature, resume_config};
pub use state::{SessionState, SessionStatus};
pub use summary::{ProgressStats, SessionSummary};
