//! Authorization policy: route access levels, filesystem scoping, shell
//! command classification, and the audit log.

pub mod acl;
pub mod audit;
pub mod command;
pub mod scope;

pub use {
    acl::{effective_level, required_level},
    audit::{AuditEntry, AuditLog},
    command::{CommandClass, classify_command},
    scope::{ScopePolicy, ScopeViolation},
};
