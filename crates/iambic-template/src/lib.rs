//! iambic Template Model
//!
//! The declarative template a repository stores for each logical resource,
//! and the building blocks the reconciliation engines share:
//!
//! - [`access`] - include/exclude account and org predicates ([`AccessModel`])
//! - [`temporal`] - absolute and relative expirations ([`TemporalExpression`])
//! - [`attribute`] - scalar, sliced and keyed-collection attribute values
//! - [`template`] - the [`Template`] entity
//! - [`schema`] - per-type schemas and the built-in registry
//! - [`variables`] - `{{var.<name>}}` substitution and its inverse
//! - [`context`] - the [`RepositoryContext`] passed into every engine call
//! - [`validation`] - schema and shape checks
//! - [`io`] - YAML load/store helpers
//!
//! # Example
//!
//! ```
//! use iambic_template::{io, Attribute};
//!
//! let template = io::from_yaml_str(
//!     "template_type: NOQ::Okta::Group\nidentifier: engineering\nproperties:\n  Name: engineering\n",
//! )
//! .unwrap();
//!
//! assert!(matches!(template.property("Name"), Some(Attribute::Scalar(_))));
//! ```

pub mod access;
pub mod attribute;
pub mod context;
pub mod io;
pub mod schema;
pub mod temporal;
pub mod template;
pub mod validation;
pub mod variables;

pub use access::{AccessModel, AccountPattern, CompiledAccess, MatchStrength, PatternError};
pub use attribute::{Attribute, Slice};
pub use context::RepositoryContext;
pub use schema::{SchemaRegistry, TemplateSchema};
pub use temporal::{TemporalError, TemporalExpression};
pub use template::{AccessRule, CommentEntry, CommentMetadata, ManagedMode, Template};
pub use variables::{VariableError, VariableScope};
