//! Cluster lifecycle state machine
//!
//! Status only changes through named `LifecycleEvent`s checked against a
//! static transition table. The table is built (and checked for conflicting
//! rules) once; firing an event that has no rule for the current status is
//! rejected and leaves the status untouched.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// Lifecycle status of a cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterStatus {
    Creating,
    Running,
    Unreachable,
    Updating,
    CreateFailed,
    Deleting,
}

impl ClusterStatus {
    /// Running or Unreachable: provisioned at least once and holding a live connection
    pub fn is_ready(self) -> bool {
        matches!(self, ClusterStatus::Running | ClusterStatus::Unreachable)
    }

    /// A Create or Update workflow is in flight
    pub fn is_busy(self) -> bool {
        matches!(self, ClusterStatus::Creating | ClusterStatus::Updating)
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Named events driving the state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    CreateSucceed,
    CreateFailed,
    CreateCanceled,
    Update,
    ContinueCreate,
    UpdateCompleted,
    UpdateCanceled,
    GetInfoFailed,
    GetInfoSucceed,
    Delete,
    DeleteCompleted,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Where a transition leads
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    Status(ClusterStatus),
    /// The cluster leaves the registry; its status stays at the source state.
    Removed,
}

/// One row of the transition table
#[derive(Clone, Copy, Debug)]
pub struct TransitionRule {
    pub event: LifecycleEvent,
    pub from: &'static [ClusterStatus],
    pub to: Target,
}

const fn rule(event: LifecycleEvent, from: &'static [ClusterStatus], to: Target) -> TransitionRule {
    TransitionRule { event, from, to }
}

use ClusterStatus::*;

/// Lifecycle transitions of a managed cluster
pub const CLUSTER_TRANSITIONS: &[TransitionRule] = &[
    rule(LifecycleEvent::CreateSucceed, &[Creating], Target::Status(Running)),
    rule(LifecycleEvent::CreateFailed, &[Creating], Target::Status(CreateFailed)),
    rule(LifecycleEvent::CreateCanceled, &[Creating], Target::Status(CreateFailed)),
    rule(LifecycleEvent::Update, &[Running, Unreachable], Target::Status(Updating)),
    rule(LifecycleEvent::ContinueCreate, &[CreateFailed], Target::Status(Creating)),
    rule(LifecycleEvent::UpdateCompleted, &[Updating], Target::Status(Running)),
    rule(LifecycleEvent::UpdateCanceled, &[Updating], Target::Status(Running)),
    rule(LifecycleEvent::GetInfoFailed, &[Running], Target::Status(Unreachable)),
    rule(LifecycleEvent::GetInfoSucceed, &[Unreachable], Target::Status(Running)),
    rule(LifecycleEvent::Delete, &[Running, Unreachable, CreateFailed], Target::Status(Deleting)),
    rule(LifecycleEvent::DeleteCompleted, &[Deleting], Target::Removed),
];

/// Errors raised by the state machine
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FsmError {
    /// No rule accepts `event` in status `from`
    InvalidTransition { event: LifecycleEvent, from: ClusterStatus },
    /// Two rules claim the same (status, event) pair
    ConflictingRule { event: LifecycleEvent, from: ClusterStatus },
    /// A rule lists no source status
    EmptyRule { event: LifecycleEvent },
}

impl fmt::Display for FsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsmError::InvalidTransition { event, from } => {
                write!(f, "event {} inappropriate in current state {}", event, from)
            }
            FsmError::ConflictingRule { event, from } => {
                write!(f, "event {} declared twice for state {}", event, from)
            }
            FsmError::EmptyRule { event } => {
                write!(f, "event {} has no source state", event)
            }
        }
    }
}

impl std::error::Error for FsmError {}

/// Lookup table built from `TransitionRule`s
#[derive(Debug)]
pub struct TransitionTable {
    rules: HashMap<(ClusterStatus, LifecycleEvent), Target>,
}

impl TransitionTable {
    /// Build a table, rejecting empty or conflicting rules
    pub fn build(rules: &[TransitionRule]) -> Result<Self, FsmError> {
        let mut table = HashMap::new();
        for rule in rules {
            if rule.from.is_empty() {
                return Err(FsmError::EmptyRule { event: rule.event });
            }
            for from in rule.from {
                if table.insert((*from, rule.event), rule.to).is_some() {
                    return Err(FsmError::ConflictingRule {
                        event: rule.event,
                        from: *from,
                    });
                }
            }
        }
        Ok(Self { rules: table })
    }

    pub fn lookup(&self, from: ClusterStatus, event: LifecycleEvent) -> Option<Target> {
        self.rules.get(&(from, event)).copied()
    }
}

fn cluster_table() -> &'static TransitionTable {
    static TABLE: OnceLock<TransitionTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        TransitionTable::build(CLUSTER_TRANSITIONS)
            .expect("cluster transition table must not contain conflicting rules")
    })
}

/// State machine instance owned by one cluster
#[derive(Debug)]
pub struct ClusterFsm {
    current: ClusterStatus,
    table: &'static TransitionTable,
}

impl ClusterFsm {
    pub fn new(initial: ClusterStatus) -> Self {
        Self {
            current: initial,
            table: cluster_table(),
        }
    }

    pub fn current(&self) -> ClusterStatus {
        self.current
    }

    pub fn can(&self, event: LifecycleEvent) -> bool {
        self.table.lookup(self.current, event).is_some()
    }

    /// Apply `event`, returning where it led
    pub fn fire(&mut self, event: LifecycleEvent) -> Result<Target, FsmError> {
        let target = self
            .table
            .lookup(self.current, event)
            .ok_or(FsmError::InvalidTransition {
                event,
                from: self.current,
            })?;
        if let Target::Status(next) = target {
            self.current = next;
        }
        Ok(target)
    }
}
