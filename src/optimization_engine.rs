use crate::document::Document;
use crate::optimization_rule::{ChangeRecord, OptimizationRule, RULE_SET};

/// Applies the fixed rule set to a descriptor in a single deterministic pass.
///
/// The engine owns the document for the duration of the run: every rule runs
/// exactly once, in registration order, against the same mutable tree, and
/// records accumulate in rule order (document traversal order within a rule).
/// Re-running the engine on its own output yields an empty change sequence.
pub struct OptimizationEngine {
    rules: Vec<OptimizationRule>,
}

/// Result of one engine run.
#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    pub document: Document,
    pub changes: Vec<ChangeRecord>,
}

impl OptimizationOutcome {
    pub fn is_already_optimized(&self) -> bool {
        self.changes.is_empty()
    }
}

impl OptimizationEngine {
    pub fn new() -> Self {
        Self {
            rules: RULE_SET.to_vec(),
        }
    }

    pub fn rules(&self) -> &[OptimizationRule] {
        &self.rules
    }

    pub fn transform(&self, mut document: Document) -> OptimizationOutcome {
        let mut changes = Vec::new();
        for rule in &self.rules {
            changes.extend(rule.apply(&mut document));
        }
        OptimizationOutcome { document, changes }
    }
}

impl Default for OptimizationEngine {
    fn default() -> Self {
        Self::new()
    }
}
