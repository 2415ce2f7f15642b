// VM Descriptor Optimization Engine
pub mod canonical;
pub mod document;
pub mod optimization_engine;
pub mod optimization_rule;
pub mod reporter;

// Re-export core types for convenience
pub use canonical::{canonical_text, canonicalize};
pub use document::{Document, Node, ParseError};
pub use optimization_engine::{OptimizationEngine, OptimizationOutcome};
pub use optimization_rule::{ChangeRecord, OptimizationRule, RuleKey, RULE_SET};
pub use reporter::{ChangeReporter, OptimizationReport, ReportError, ReportFormat};
