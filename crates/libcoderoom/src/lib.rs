pub mod broker;
pub mod error;
pub mod exec;
pub mod output;
pub mod session;
pub mod tree;

use std::time::{SystemTime, UNIX_EPOCH};

pub use broker::{Envelope, EventBus, Subscription};
pub use error::{CoderoomError, ProcessError};
pub use exec::{ExecConfig, Orchestrator, Pipeline, RunState, Toolchains};
pub use session::{Joined, LeaveOutcome, RegistryConfig, Session, SessionRegistry, TreeOp};
pub use tree::{TreeEvent, WorkspacePath, WorkspaceTree};

pub(crate) fn epoch_ms(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
