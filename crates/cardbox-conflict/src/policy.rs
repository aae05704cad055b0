//! Strategy selection policy
//!
//! Decides which [`ResolutionStrategy`] applies to a detected conflict when
//! the caller has not made an explicit per-conflict choice. Rules are
//! evaluated first-match-wins by entity type, then the configured default,
//! then last-write-wins on timestamps.
//!
//! An automatically selected `Merge` is downgraded to `CreateNew` when the
//! conflict's severity reaches the configured threshold (by default the
//! start of the High risk band): an unsafe merge must not destroy either
//! version. Explicit user choices bypass the engine entirely.

use tracing::debug;

use cardbox_core::config::ConflictsConfig;
use cardbox_core::domain::{ConflictRecord, EntityType, ResolutionStrategy};

const DEFAULT_UNSAFE_MERGE_SEVERITY: f64 = 0.5;

/// One policy rule: a strategy for an entity type
#[derive(Debug, Clone)]
pub struct PolicyRule {
    pub entity_type: EntityType,
    pub strategy: ResolutionStrategy,
}

/// First-match-wins strategy selector
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    rules: Vec<PolicyRule>,
    default_strategy: Option<ResolutionStrategy>,
    /// Severity at or above which an automatic merge is refused
    unsafe_merge_severity: f64,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new(Vec::new(), None)
    }
}

impl PolicyEngine {
    pub fn new(rules: Vec<PolicyRule>, default_strategy: Option<ResolutionStrategy>) -> Self {
        Self {
            rules,
            default_strategy,
            unsafe_merge_severity: DEFAULT_UNSAFE_MERGE_SEVERITY,
        }
    }

    pub fn from_config(config: &ConflictsConfig) -> Self {
        Self {
            rules: Vec::new(),
            default_strategy: config.default_strategy,
            unsafe_merge_severity: config.unsafe_merge_severity.clamp(0.0, 1.0),
        }
    }

    /// Adds a rule at the end of the chain
    pub fn with_rule(mut self, rule: PolicyRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Picks the strategy for a detected conflict.
    ///
    /// Precedence: first matching rule, then the configured default, then
    /// last-write-wins (`AcceptRemote` if the remote is newer, otherwise
    /// `AcceptLocal`). A `Merge` selected here is downgraded to
    /// `CreateNew` at High risk or above.
    pub fn strategy_for(&self, record: &ConflictRecord) -> ResolutionStrategy {
        let chosen = self
            .rules
            .iter()
            .find(|rule| rule.entity_type == record.entity_type)
            .map(|rule| rule.strategy)
            .or(self.default_strategy)
            .unwrap_or_else(|| last_write_wins(record));

        if chosen == ResolutionStrategy::Merge && record.severity >= self.unsafe_merge_severity {
            debug!(
                conflict_id = %record.id,
                severity = record.severity,
                risk = %record.risk_level,
                "merge judged unsafe, falling back to create_new"
            );
            return ResolutionStrategy::CreateNew;
        }
        chosen
    }
}

fn last_write_wins(record: &ConflictRecord) -> ResolutionStrategy {
    if record.remote_snapshot.meta().updated_at > record.local_snapshot.meta().updated_at {
        ResolutionStrategy::AcceptRemote
    } else {
        ResolutionStrategy::AcceptLocal
    }
}
