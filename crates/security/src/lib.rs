//! Action gates for Colony: policy rules and an audit trail of decisions.
//!
//! Provides:
//! - **Policies**: [`AllowAllGate`] and the rule-based [`PolicyGate`] built from `[gate]` config
//! - **Audit logging**: [`AuditedGate`] records every decision to an [`AuditLogger`] and its sinks

pub mod audit;
pub mod policy;

pub use audit::{AuditEntry, AuditLogger, AuditOutcome, AuditSink, AuditedGate, TracingSink};
pub use policy::{AllowAllGate, PolicyGate};
