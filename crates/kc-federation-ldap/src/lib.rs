//! # kc-federation-ldap
//!
//! LDAP and Active Directory identity provider.
//!
//! One [`LdapIdentityProvider`] serves one identity source. It is built
//! from these parts:
//!
//! - [`schema`] - attribute names and filter templates per directory flavor
//! - [`connection`] - pooling, failover and site-affinity endpoint caching
//! - [`search`] - paged search negotiation and ranged attribute retrieval
//! - [`groups`] - direct and nested parent group resolution
//! - [`status`] - account flags, lockout timestamps and password policy
//! - [`translator`] - users and groups from directory entries
//!
//! ## Security
//!
//! Only `ldaps://` URLs are accepted unless plaintext is explicitly
//! allowed. Substituted filter values are always escaped.

#![forbid(unsafe_code)]
#![deny(warnings)]
#![deny(missing_docs)]

pub mod config;
pub mod connection;
pub mod error;
pub mod groups;
pub mod provider;
pub mod schema;
pub mod search;
pub mod status;
pub mod topology;
pub mod translator;
pub mod transport;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use config::{LdapConfig, LdapConfigBuilder, ProviderFlags, SchemaKind, SearchScope};
pub use connection::{ConnectionPool, EndpointCache, PooledConnection};
pub use error::{LdapError, LdapResult};
pub use provider::LdapIdentityProvider;
pub use schema::{ActiveDirectorySchema, AttributeId, FilterOp, GenericSchema, SchemaMapping};
pub use search::{DirectoryEntry, PagedCapability, SearchEngine};
pub use topology::{DomainControllerInfo, TopologyDiscovery};
pub use transport::{BindCredentials, DirectoryConnection, DirectoryConnector, SearchRequest};
