//! # kc-federation
//!
//! Identity-provider contract for directory federation.
//!
//! This crate defines the principal model ([`PrincipalId`], [`PersonUser`],
//! [`Group`]), the [`IdentityProvider`] trait implemented by directory
//! backends, and the [`FederationError`] taxonomy callers branch on.

#![forbid(unsafe_code)]
#![deny(warnings)]
#![deny(missing_docs)]

pub mod error;
pub mod principal;
pub mod provider;

pub use error::{FederationError, FederationResult};
pub use principal::{
    AccountStatus, AttributeValuePair, Group, GroupDetail, PersonDetail, PersonUser,
    PrincipalGroupLookupInfo, PrincipalId, SearchResult,
};
pub use provider::{split_user_limit, IdentityProvider, SearchLimit};
