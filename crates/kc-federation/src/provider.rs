//! Identity provider contract.
//!
//! Token issuance and attribute resolution call into an identity source
//! through [`IdentityProvider`]. One provider instance serves one configured
//! domain and is shared by every in-flight request.

use crate::error::FederationResult;
use crate::principal::{
    AccountStatus, AttributeValuePair, Group, PersonUser, PrincipalGroupLookupInfo, PrincipalId,
    SearchResult,
};

/// Result-count limit for searches.
///
/// `None` is unbounded; `Some(0)` returns nothing without querying.
pub type SearchLimit = Option<usize>;

/// Splits a combined limit between users and groups.
///
/// Users receive the larger half. Groups receive whatever users did not
/// consume.
#[must_use]
pub fn split_user_limit(limit: SearchLimit) -> SearchLimit {
    limit.map(|l| l / 2 + l % 2)
}

/// Trait for directory-backed identity sources.
///
/// ## Implementation Notes
///
/// - Providers are shared across requests and must be `Send + Sync`
/// - Principals outside the provider's domain or alias are rejected with
///   `FederationError::InvalidPrincipal` before any directory round trip
/// - Every borrowed connection is returned on all exit paths
#[allow(async_fn_in_trait)]
pub trait IdentityProvider: Send + Sync {
    /// Domain name served by this provider.
    fn domain(&self) -> &str;

    /// Optional alias domain.
    fn alias(&self) -> Option<&str>;

    /// Checks whether `domain` is the provider's domain or its alias.
    fn belongs_to(&self, domain: &str) -> bool {
        domain.eq_ignore_ascii_case(self.domain())
            || self.alias().is_some_and(|a| a.eq_ignore_ascii_case(domain))
    }

    /// Verifies the directory is reachable with the configured credentials.
    async fn probe_connection(&self) -> FederationResult<()>;

    // === Authentication ===

    /// Verifies the password of `principal` and returns its canonical id.
    async fn authenticate(&self, principal: &PrincipalId, password: &str)
        -> FederationResult<PrincipalId>;

    // === Users ===

    /// Finds a user by principal id. Exactly one entry must match.
    async fn find_user(&self, principal: &PrincipalId) -> FederationResult<PersonUser>;

    /// Finds a user by its stable object identifier.
    async fn find_user_by_object_id(&self, object_id: &str) -> FederationResult<PersonUser>;

    /// Finds users whose name attributes contain `search`.
    async fn find_users(&self, search: &str, limit: SearchLimit)
        -> FederationResult<Vec<PersonUser>>;

    /// Finds direct user members of `group` matching `search`.
    async fn find_users_in_group(
        &self,
        group: &PrincipalId,
        search: &str,
        limit: SearchLimit,
    ) -> FederationResult<Vec<PersonUser>>;

    /// Finds disabled users matching `search`.
    async fn find_disabled_users(
        &self,
        search: &str,
        limit: SearchLimit,
    ) -> FederationResult<Vec<PersonUser>>;

    /// Finds locked users matching `search`.
    async fn find_locked_users(
        &self,
        search: &str,
        limit: SearchLimit,
    ) -> FederationResult<Vec<PersonUser>>;

    // === Groups ===

    /// Finds a group by principal id. `None` when no group matches.
    async fn find_group(&self, group: &PrincipalId) -> FederationResult<Option<Group>>;

    /// Finds a group by its stable object identifier.
    async fn find_group_by_object_id(&self, object_id: &str) -> FederationResult<Group>;

    /// Finds groups whose name or description contains `search`.
    async fn find_groups(&self, search: &str, limit: SearchLimit) -> FederationResult<Vec<Group>>;

    /// Finds direct group members of `group` matching `search`.
    async fn find_groups_in_group(
        &self,
        group: &PrincipalId,
        search: &str,
        limit: SearchLimit,
    ) -> FederationResult<Vec<Group>>;

    /// Groups that directly contain `principal`.
    async fn find_direct_parent_groups(
        &self,
        principal: &PrincipalId,
    ) -> FederationResult<PrincipalGroupLookupInfo>;

    /// Groups that contain `principal` directly or transitively.
    async fn find_nested_parent_groups(
        &self,
        principal: &PrincipalId,
    ) -> FederationResult<PrincipalGroupLookupInfo>;

    /// Finds users and groups, splitting `limit` between them.
    async fn find(&self, search: &str, limit: SearchLimit) -> FederationResult<SearchResult> {
        let users = self.find_users(search, split_user_limit(limit)).await?;
        let group_limit = limit.map(|l| l.saturating_sub(users.len()));
        let groups = if group_limit == Some(0) {
            Vec::new()
        } else {
            self.find_groups(search, group_limit).await?
        };
        Ok(SearchResult { users, groups })
    }

    // === Attributes and status ===

    /// Resolves the requested logical attributes of a user.
    async fn get_attributes(
        &self,
        principal: &PrincipalId,
        attributes: &[String],
    ) -> FederationResult<Vec<AttributeValuePair>>;

    /// Decodes the account status of a user.
    async fn account_status(&self, principal: &PrincipalId) -> FederationResult<AccountStatus>;

    /// Fails with `AccountLocked` or `PasswordExpired` when either applies.
    async fn check_account_status(&self, principal: &PrincipalId) -> FederationResult<()> {
        let status = self.account_status(principal).await?;
        if status.locked {
            return Err(crate::error::FederationError::AccountLocked(
                principal.to_string(),
            ));
        }
        if status.password_expired {
            return Err(crate::error::FederationError::PasswordExpired(
                principal.to_string(),
            ));
        }
        Ok(())
    }

    /// A user is active when the account is not disabled.
    async fn is_active(&self, principal: &PrincipalId) -> FederationResult<bool> {
        Ok(self.account_status(principal).await?.is_active())
    }
}
