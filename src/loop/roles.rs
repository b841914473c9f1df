//! Prompt-role selection
//!
//! A pure state machine: input is the iteration number, the session flags,
//! and the signal snapshot taken at iteration start; output is the role plus
//! the side effects the caller must apply (consuming `TRIGGER_MANAGER`,
//! flipping the manager-first flag). Keeping effects out of the selector
//! makes every rule testable in isolation.

use super::signals::SignalSet;

/// The prompt roles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initializer,
    Coder,
    Manager,
    Qa,
    Cleaner,
    JiraInitializer,
    JiraWorker,
    JiraManager,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initializer => "initializer",
            Self::Coder => "coder",
            Self::Manager => "manager",
            Self::Qa => "qa",
            Self::Cleaner => "cleaner",
            Self::JiraInitializer => "jira-initializer",
            Self::JiraWorker => "jira-worker",
            Self::JiraManager => "jira-manager",
        }
    }

    /// Prompt template backing this role
    pub fn template_name(&self) -> &'static str {
        match self {
            Self::Initializer => "initializer_prompt",
            Self::Coder => "coding_prompt",
            Self::Manager => "manager_prompt",
            Self::Qa => "qa_prompt",
            Self::Cleaner => "cleaner_prompt",
            Self::JiraInitializer => "jira_initializer_prompt",
            Self::JiraWorker => "jira_worker_prompt",
            Self::JiraManager => "jira_manager_prompt",
        }
    }

    /// Manager iterations may switch to a dedicated model
    pub fn is_manager(&self) -> bool {
        matches!(self, Self::Manager | Self::JiraManager)
    }
}

/// Session-level inputs to the selector
#[derive(Debug, Clone, Copy)]
pub struct SelectorFlags {
    /// Feature-list file was absent when the session began
    pub first_run: bool,

    /// Run the manager before the first coding session
    pub manager_first: bool,

    /// The manager-first run already happened
    pub manager_first_consumed: bool,

    /// Session is bound to a ticket (substitutes jira-variants)
    pub ticket_bound: bool,

    /// Periodic manager cadence; 0 disables the periodic rule
    pub manager_frequency: u64,
}

/// Selector output: the role and the side effects to apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub role: Role,

    /// Delete the `TRIGGER_MANAGER` marker
    pub consume_trigger: bool,

    /// Record that the manager-first run happened
    pub consume_manager_first: bool,

    /// The manager was requested externally rather than by cadence
    pub externally_triggered: bool,
}

impl Selection {
    fn role(role: Role) -> Self {
        Self {
            role,
            consume_trigger: false,
            consume_manager_first: false,
            externally_triggered: false,
        }
    }
}

/// Select the role for this iteration. Rules are evaluated in order; the
/// first match wins.
pub fn select_role(iteration: u64, flags: &SelectorFlags, signals: &SignalSet) -> Selection {
    // 1. Sign-off is terminal: only cleanup remains
    if signals.signed_off && !signals.cleanup_report {
        return Selection::role(Role::Cleaner);
    }

    // 2. Nothing exists yet: initialize
    if flags.first_run {
        let role = if flags.ticket_bound {
            Role::JiraInitializer
        } else {
            Role::Initializer
        };
        return Selection::role(role);
    }

    // 3. One-shot external trigger: forced manager, no QA substitution
    if signals.trigger_manager {
        return Selection {
            role: manager_for(flags),
            consume_trigger: true,
            consume_manager_first: false,
            externally_triggered: true,
        };
    }

    // 4. Manager-first: forced manager, once
    if flags.manager_first && !flags.manager_first_consumed {
        return Selection {
            role: manager_for(flags),
            consume_trigger: false,
            consume_manager_first: true,
            externally_triggered: false,
        };
    }

    // 5-7. Cadence- and completion-driven managers, QA-gated
    let periodic = flags.manager_frequency > 0 && iteration > 0 && iteration % flags.manager_frequency == 0;
    let auto_sign_off = signals.feature_list_exists && signals.all_features_pass;
    let completed_unsigned = signals.completed && !signals.signed_off;

    if periodic || auto_sign_off || completed_unsigned {
        // Completion claimed but unverified: QA runs before the manager sees it
        if signals.completed && !signals.qa_passed {
            return Selection::role(Role::Qa);
        }
        return Selection::role(manager_for(flags));
    }

    // 8. Default: write code
    let role = if flags.ticket_bound { Role::JiraWorker } else { Role::Coder };
    Selection::role(role)
}

fn manager_for(flags: &SelectorFlags) -> Role {
    if flags.ticket_bound {
        Role::JiraManager
    } else {
        Role::Manager
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags() -> SelectorFlags {
        SelectorFlags {
            first_run: false,
            manager_first: false,
            manager_first_consumed: false,
            ticket_bound: false,
            manager_frequency: 10,
        }
    }

    #[test]
    fn test_default_is_coder() {
        let selection = select_role(1, &flags(), &SignalSet::default());
        assert_eq!(selection.role, Role::Coder);
        assert!(!selection.consume_trigger);
    }

    #[test]
    fn test_first_run_selects_initializer() {
        let mut f = flags();
        f.first_run = true;
        assert_eq!(select_role(1, &f, &SignalSet::default()).role, Role::Initializer);

        f.ticket_bound = true;
        assert_eq!(select_role(1, &f, &SignalSet::default()).role, Role::JiraInitializer);
    }

    #[test]
    fn test_sign_off_selects_cleaner_until_report() {
        let mut signals = SignalSet {
            signed_off: true,
            ..Default::default()
        };
        assert_eq!(select_role(5, &flags(), &signals).role, Role::Cleaner);

        // Cleaner outranks first-run and triggers
        let mut f = flags();
        f.first_run = true;
        signals.trigger_manager = true;
        assert_eq!(select_role(5, &f, &signals).role, Role::Cleaner);

        signals.cleanup_report = true;
        signals.trigger_manager = false;
        f.first_run = false;
        assert_ne!(select_role(5, &f, &signals).role, Role::Cleaner);
    }

    #[test]
    fn test_trigger_manager_forced_and_consumed() {
        let signals = SignalSet {
            trigger_manager: true,
            ..Default::default()
        };
        let selection = select_role(1, &flags(), &signals);
        assert_eq!(selection.role, Role::Manager);
        assert!(selection.consume_trigger);
        assert!(selection.externally_triggered);
    }

    #[test]
    fn test_trigger_manager_skips_qa_substitution() {
        // Forced managers run even with COMPLETED present and QA pending
        let signals = SignalSet {
            trigger_manager: true,
            completed: true,
            ..Default::default()
        };
        assert_eq!(select_role(1, &flags(), &signals).role, Role::Manager);
    }

    #[test]
    fn test_manager_first_consumed_once() {
        let mut f = flags();
        f.manager_first = true;

        let selection = select_role(1, &f, &SignalSet::default());
        assert_eq!(selection.role, Role::Manager);
        assert!(selection.consume_manager_first);

        f.manager_first_consumed = true;
        assert_eq!(select_role(1, &f, &SignalSet::default()).role, Role::Coder);
    }

    #[test]
    fn test_periodic_manager() {
        let f = flags();
        assert_eq!(select_role(10, &f, &SignalSet::default()).role, Role::Manager);
        assert_eq!(select_role(20, &f, &SignalSet::default()).role, Role::Manager);
        assert_eq!(select_role(11, &f, &SignalSet::default()).role, Role::Coder);
    }

    #[test]
    fn test_iteration_zero_never_periodic() {
        let mut f = flags();
        f.manager_frequency = 1;
        // Every iteration matches the cadence, but iteration 0 is excluded
        assert_eq!(select_role(0, &f, &SignalSet::default()).role, Role::Coder);
    }

    #[test]
    fn test_frequency_zero_disables_cadence() {
        let mut f = flags();
        f.manager_frequency = 0;
        assert_eq!(select_role(100, &f, &SignalSet::default()).role, Role::Coder);
    }

    #[test]
    fn test_all_features_passing_triggers_manager() {
        let signals = SignalSet {
            feature_list_exists: true,
            all_features_pass: true,
            ..Default::default()
        };
        assert_eq!(select_role(3, &flags(), &signals).role, Role::Manager);
    }

    #[test]
    fn test_completed_without_qa_runs_qa_first() {
        let mut signals = SignalSet {
            completed: true,
            ..Default::default()
        };
        assert_eq!(select_role(3, &flags(), &signals).role, Role::Qa);

        signals.qa_passed = true;
        assert_eq!(select_role(3, &flags(), &signals).role, Role::Manager);
    }

    #[test]
    fn test_periodic_manager_with_completed_diverts_to_qa() {
        let signals = SignalSet {
            completed: true,
            ..Default::default()
        };
        let selection = select_role(10, &flags(), &signals);
        assert_eq!(selection.role, Role::Qa);
    }

    #[test]
    fn test_periodic_manager_without_completed_skips_qa() {
        // No completion claim: nothing for QA to verify
        assert_eq!(select_role(10, &flags(), &SignalSet::default()).role, Role::Manager);
    }

    #[test]
    fn test_jira_substitution() {
        let mut f = flags();
        f.ticket_bound = true;

        assert_eq!(select_role(1, &f, &SignalSet::default()).role, Role::JiraWorker);
        assert_eq!(select_role(10, &f, &SignalSet::default()).role, Role::JiraManager);

        let signals = SignalSet {
            trigger_manager: true,
            ..Default::default()
        };
        assert_eq!(select_role(1, &f, &signals).role, Role::JiraManager);
    }

    #[test]
    fn test_selector_is_pure() {
        let f = flags();
        let signals = SignalSet {
            trigger_manager: true,
            ..Default::default()
        };
        assert_eq!(select_role(4, &f, &signals), select_role(4, &f, &signals));
    }
}
