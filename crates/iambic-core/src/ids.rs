//! Strongly Typed Identifiers
//!
//! Account and organization identifiers are opaque strings issued by the
//! cloud provider (an AWS account number, an Okta org name, an Azure tenant).
//! Wrapping them in newtypes keeps an account id from being passed where an
//! org id is expected.
//!
//! # Example
//!
//! ```
//! use iambic_core::{AccountId, OrgId};
//!
//! let account = AccountId::new("123456789012");
//! let org = OrgId::new("o-abc123");
//!
//! fn requires_account(id: &AccountId) -> &str {
//!     id.as_str()
//! }
//!
//! assert_eq!(requires_account(&account), "123456789012");
//! // requires_account(&org); // This would not compile!
//! ```

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Macro to define a strongly-typed string ID type
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an ID from a provider-issued string.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the underlying string.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id!(
    /// Identifier of a cloud account (AWS account id, Okta org, Azure tenant).
    AccountId
);

define_id!(
    /// Identifier of the organization an account belongs to.
    ///
    /// Accounts without an organization never match an explicit
    /// `included_orgs` entry.
    OrgId
);
