//! Relational persistence and claims-driven grouping sync for casbin.
//!
//! # Purpose
//! Bridges an in-memory casbin enforcer to a relational rule table so policy
//! survives restarts, and keeps each principal's group memberships in step
//! with the groups asserted by its identity provider.
//!
//! # How it fits
//! - [`RuleAdapter`] implements casbin's adapter contract on top of a
//!   [`RuleStore`] (Postgres, SQLite, or in-memory).
//! - [`model::build_enforcer`] loads the policy and enables write-through.
//! - [`GroupingSynchronizer`] runs a clear-then-reapply pass per request and
//!   denies when the pass fails.
//!
//! # Key invariants
//! - A rule is a type plus up to six ordered string values; values travel as
//!   vectors end to end and are truncated after the last non-empty slot.
//! - Inserting an existing rule and deleting a missing one both succeed.
//! - `save_policy` replaces the whole table atomically.
//!
//! # Examples
//! ```rust
//! use rbac_store::RuleRecord;
//!
//! let (record, last) = RuleRecord::encode("p", &["role:reader", "doc/*", "read"]).unwrap();
//! assert_eq!(last, Some(2));
//! assert_eq!(record.to_values().unwrap(), vec!["role:reader", "doc/*", "read"]);
//! ```
//!
//! # Common pitfalls
//! - Saving after a filtered load would drop every rule outside the filter;
//!   the adapter refuses it.
//! - Without `serialize_per_principal`, overlapping passes for one principal
//!   interleave row by row.

pub mod adapter;
pub mod config;
pub mod errors;
pub mod model;
pub mod observability;
pub mod record;
pub mod store;
pub mod sync;

pub use adapter::RuleAdapter;
pub use config::{AdapterConfig, DatabaseConfig, StorageBackend, SyncConfig};
pub use errors::{CodecError, MappingError, StoreError, StoreResult, SyncError};
pub use model::{SharedEnforcer, build_enforcer, build_enforcer_with_model};
pub use observability::init_observability;
pub use record::{MAX_SLOTS, RuleFilter, RuleRecord, TypeMatch};
pub use store::{RuleStore, open_store};
pub use sync::claims::{ClaimMappings, IdentityClaims, principal_id};
pub use sync::mapping::{RoleMappingRepository, StaticRoleMappings};
pub use sync::{GroupingSynchronizer, SyncReport, SyncState};
