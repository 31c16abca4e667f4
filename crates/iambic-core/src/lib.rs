//! iambic Core Library
//!
//! Shared types for the template reconciliation engines.
//!
//! # Modules
//!
//! - [`ids`] - Strongly typed identifiers (AccountId, OrgId)
//! - [`context`] - Per-account resolution target (AccountContext)
//! - [`error`] - Standardized error types (IambicError)
//!
//! # Example
//!
//! ```
//! use iambic_core::{AccountContext, IambicError, Result};
//!
//! let prod = AccountContext::new("111111111111", "prod").with_variable("env", "prod");
//!
//! fn example(account: &AccountContext) -> Result<()> {
//!     Err(IambicError::resolution("admin_role", account.account_name.clone(), "unknown variable"))
//! }
//!
//! assert!(example(&prod).is_err());
//! ```

pub mod context;
pub mod error;
pub mod ids;

// Re-export main types for convenient access
pub use context::AccountContext;
pub use error::{ErrorKind, IambicError, Result};
pub use ids::{AccountId, OrgId};
