//! Agent loop: signal files, role selection, iteration state, engine

mod engine;
mod roles;
mod signals;
mod state;

pub use engine::{AgentLoop, LoopOutcome};
pub use roles::{Role, Selection, SelectorFlags, select_role};
pub use signals::{
    CLEANUP_REPORT, COMPLETED, FEATURE_LIST, HUMAN_IN_LOOP, PROJECT_SIGNED_OFF, QA_PASSED,
    SIGNAL_FILES, SignalSet, TRIGGER_MANAGER, clear_stale_signals, consume_trigger_manager,
};
pub use state::IterationState;
