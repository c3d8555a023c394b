//! Directory-backed identity provider.
//!
//! [`LdapIdentityProvider`] wires the schema mapping, connection pool,
//! search engine, group resolver, status decoder and translator of one
//! identity source into the [`IdentityProvider`] contract.
//!
//! ## Security Requirements
//!
//! - Filters are built only through the schema mapping, which escapes
//!   every substituted value
//! - Password checks bind on a dedicated connection that never returns
//!   to the pool
//! - Passwords are never logged

use std::sync::Arc;

use kc_federation::{
    AccountStatus, AttributeValuePair, FederationError, FederationResult, Group, IdentityProvider,
    PersonUser, PrincipalGroupLookupInfo, PrincipalId, SearchLimit,
};

use crate::config::{LdapConfig, SearchScope};
use crate::connection::ConnectionPool;
use crate::error::{LdapError, LdapResult};
use crate::groups::NestedGroupResolver;
use crate::schema::{self, AttributeId, FilterOp, SchemaMapping};
use crate::search::{DirectoryEntry, PagedCapability, SearchEngine};
use crate::status::{AccountFlags, AccountStatusDecoder, DecoderSession};
use crate::topology::TopologyDiscovery;
use crate::translator::{PrincipalTranslator, Sid};
use crate::transport::{
    BindCredentials, DirectoryConnection, DirectoryConnector, Ldap3Connector, SearchRequest,
};

/// Attribute answered with the literal `"false"`.
pub const SUBJECT_TYPE_ATTRIBUTE: &str = "subjectType";

/// Attribute answered with the native or synthesized UPN.
pub const UPN_ATTRIBUTE: &str = "userPrincipalName";

/// Attribute answered with the nested group closure as `DOMAIN\name`.
pub const MEMBER_OF_ATTRIBUTE: &str = "memberOf";

/// Attribute appended to every attribute lookup: the principal's object
/// id followed by the object id of each group it belongs to.
pub const GROUP_OBJECT_IDS_ATTRIBUTE: &str = "groupObjectIds";

/// Identity provider for one LDAP or Active Directory identity source.
pub struct LdapIdentityProvider {
    config: Arc<LdapConfig>,
    schema: Arc<dyn SchemaMapping>,
    pool: ConnectionPool,
    engine: Arc<SearchEngine>,
    translator: PrincipalTranslator,
    decoder: AccountStatusDecoder,
    groups: NestedGroupResolver,
}

impl LdapIdentityProvider {
    /// Creates a provider that connects with `ldap3` to the configured URLs.
    ///
    /// ## Errors
    ///
    /// Fails when the configuration is invalid or asks for site affinity,
    /// which needs a topology service (see [`Self::with_transport`]).
    pub fn new(config: LdapConfig) -> LdapResult<Self> {
        if config.flags.site_affinity {
            return Err(LdapError::config(
                "site affinity needs a topology discovery service",
            ));
        }
        let connector = Ldap3Connector::new(config.connection_timeout(), config.validate_certificates);
        Self::with_transport(config, Arc::new(connector), None)
    }

    /// Creates a provider over an explicit transport and topology service.
    pub fn with_transport(
        config: LdapConfig,
        connector: Arc<dyn DirectoryConnector>,
        topology: Option<Arc<dyn TopologyDiscovery>>,
    ) -> LdapResult<Self> {
        config.validate()?;
        if config.flags.site_affinity && topology.is_none() {
            return Err(LdapError::config(
                "site affinity needs a topology discovery service",
            ));
        }

        let config = Arc::new(config);
        let schema = schema::for_config(&config)?;
        let engine = Arc::new(SearchEngine::from_config(&config));
        let translator =
            PrincipalTranslator::new(schema.clone(), config.name.clone(), config.alias.clone());
        let decoder = AccountStatusDecoder::new(
            schema.clone(),
            config.user_base_dn.clone(),
            config.domain_dn(),
        );
        let groups =
            NestedGroupResolver::new(&config, schema.clone(), engine.clone(), translator.clone());
        let pool = ConnectionPool::new(config.clone(), connector, topology);

        tracing::info!(
            domain = %config.name,
            schema = ?config.schema,
            site_affinity = config.flags.site_affinity,
            "LDAP identity provider initialized"
        );

        Ok(Self {
            config,
            schema,
            pool,
            engine,
            translator,
            decoder,
            groups,
        })
    }

    /// Identity-source configuration.
    #[must_use]
    pub fn config(&self) -> &LdapConfig {
        &self.config
    }

    /// Connection pool.
    #[must_use]
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Paged-search capability negotiated so far.
    #[must_use]
    pub fn capability(&self) -> PagedCapability {
        self.engine.capability()
    }

    // ========================================================================
    // Entry lookups
    // ========================================================================

    fn subtree(&self, base: &str, filter: String, attributes: &[&str]) -> SearchRequest {
        SearchRequest::new(base, SearchScope::Subtree, filter, attributes)
    }

    fn criteria_filter(&self, all: FilterOp, criteria: FilterOp, search: &str) -> LdapResult<String> {
        let search = search.trim();
        if search.is_empty() {
            self.schema.build_filter(all, "")
        } else {
            self.schema.build_filter(criteria, search)
        }
    }

    fn user_lookup_attributes(&self, extra: &[&str]) -> Vec<String> {
        let mut attributes: Vec<String> = self
            .translator
            .user_attributes(true)
            .into_iter()
            .chain(self.decoder.attributes())
            .chain(self.schema.attribute(AttributeId::UserPrimaryGroupId))
            .chain(extra.iter().copied())
            .map(ToString::to_string)
            .collect();
        attributes.sort_by_key(|a| a.to_ascii_lowercase());
        attributes.dedup_by(|a, b| a.eq_ignore_ascii_case(b));
        attributes
    }

    /// Entry of the user `principal`.
    ///
    /// The UPN filter is tried first where the schema has one; the account
    /// name filter then has to match exactly one entry of the principal's
    /// domain.
    async fn find_account_entry(
        &self,
        conn: &mut dyn DirectoryConnection,
        principal: &PrincipalId,
        attributes: &[String],
    ) -> LdapResult<DirectoryEntry> {
        let attributes: Vec<&str> = attributes.iter().map(String::as_str).collect();
        let base = self.config.user_base_dn.as_str();

        if self.schema.filter_template(FilterOp::UserByUpn).is_some() {
            let filter = self.schema.build_filter(FilterOp::UserByUpn, &principal.upn())?;
            let request = self.subtree(base, filter, &attributes).with_size_limit(2);
            let mut entries = self.engine.search(conn, &request).await?;
            if entries.len() > 1 {
                tracing::warn!(base_dn = %base, filter = %request.filter, "Multiple entries share one UPN");
                return Err(LdapError::invalid_principal(
                    "multiple entries match the principal name",
                    principal.upn(),
                ));
            }
            if let Some(entry) = entries.pop() {
                return Ok(entry);
            }
        }

        let filter = self
            .schema
            .build_filter(FilterOp::UserByAccountName, principal.name())?;
        let request = self.subtree(base, filter, &attributes);
        let entries: Vec<DirectoryEntry> = self
            .engine
            .search(conn, &request)
            .await?
            .into_iter()
            .filter(|e| principal.is_in_domain(&self.translator.entry_domain(e)))
            .collect();
        self.exactly_one(entries, principal, &request)
    }

    /// Entry of the user or group `principal`, searched under the user base
    /// first and the group base second.
    async fn find_principal_entry(
        &self,
        conn: &mut dyn DirectoryConnection,
        principal: &PrincipalId,
    ) -> LdapResult<DirectoryEntry> {
        let mut attributes: Vec<&str> = Vec::new();
        for id in [
            AttributeId::UserAccountName,
            AttributeId::UserObjectId,
            AttributeId::UserPrimaryGroupId,
            AttributeId::GroupAccountName,
            AttributeId::GroupObjectId,
        ] {
            if let Some(name) = self.schema.attribute(id) {
                if !attributes.iter().any(|a| a.eq_ignore_ascii_case(name)) {
                    attributes.push(name);
                }
            }
        }
        let filter = self
            .schema
            .build_filter(FilterOp::UserOrGroupByAccountName, principal.name())?;

        let mut bases = vec![self.config.user_base_dn.as_str()];
        if !self.config.group_base_dn.eq_ignore_ascii_case(&self.config.user_base_dn) {
            bases.push(self.config.group_base_dn.as_str());
        }

        let mut last_request = None;
        for base in bases {
            let request = self.subtree(base, filter.clone(), &attributes);
            let entries: Vec<DirectoryEntry> = self
                .engine
                .search(conn, &request)
                .await?
                .into_iter()
                .filter(|e| principal.is_in_domain(&self.translator.entry_domain(e)))
                .collect();
            if !entries.is_empty() {
                return self.exactly_one(entries, principal, &request);
            }
            last_request = Some(request);
        }

        match last_request {
            Some(request) => self.exactly_one(Vec::new(), principal, &request),
            None => Err(LdapError::config("no search base configured")),
        }
    }

    /// Entry of the group `group`, `None` when no group matches.
    async fn find_group_entry(
        &self,
        conn: &mut dyn DirectoryConnection,
        group: &PrincipalId,
    ) -> LdapResult<Option<DirectoryEntry>> {
        let filter = self
            .schema
            .build_filter(FilterOp::GroupByAccountName, group.name())?;
        let attributes = self.translator.group_attributes();
        let request = self.subtree(self.config.group_base_dn.as_str(), filter, &attributes);
        let entries: Vec<DirectoryEntry> = self
            .engine
            .search(conn, &request)
            .await?
            .into_iter()
            .filter(|e| group.is_in_domain(&self.translator.entry_domain(e)))
            .collect();
        if entries.is_empty() {
            tracing::debug!(base_dn = %request.base, filter = %request.filter, "Group not found");
            return Ok(None);
        }
        self.exactly_one(entries, group, &request).map(Some)
    }

    fn exactly_one(
        &self,
        mut entries: Vec<DirectoryEntry>,
        principal: &PrincipalId,
        request: &SearchRequest,
    ) -> LdapResult<DirectoryEntry> {
        if entries.len() > 1 {
            tracing::warn!(
                base_dn = %request.base,
                filter = %request.filter,
                count = entries.len(),
                "Principal lookup matched multiple entries"
            );
            return Err(LdapError::invalid_principal(
                "multiple entries match the principal",
                principal.upn(),
            ));
        }
        entries.pop().ok_or_else(|| {
            tracing::debug!(base_dn = %request.base, filter = %request.filter, "Principal not found");
            LdapError::invalid_principal("principal not found", principal.upn())
        })
    }

    async fn find_by_object_id(
        &self,
        conn: &mut dyn DirectoryConnection,
        op: FilterOp,
        base: &str,
        object_id: &str,
        attributes: &[&str],
    ) -> LdapResult<DirectoryEntry> {
        let filter = self.schema.build_filter(op, object_id)?;
        let request = self.subtree(base, filter, attributes);
        let mut entries = self.engine.search(conn, &request).await?;
        if entries.len() > 1 {
            tracing::warn!(base_dn = %base, filter = %request.filter, "Object id matched multiple entries");
            return Err(LdapError::invalid_principal(
                "multiple entries share the object id",
                object_id,
            ));
        }
        entries.pop().ok_or_else(|| {
            tracing::debug!(base_dn = %base, filter = %request.filter, "Object id not found");
            LdapError::invalid_principal("no entry has the object id", object_id)
        })
    }

    // ========================================================================
    // Translation
    // ========================================================================

    async fn build_user(
        &self,
        conn: &mut dyn DirectoryConnection,
        session: &mut DecoderSession<'_>,
        entry: &DirectoryEntry,
        extended: bool,
    ) -> LdapResult<(PersonUser, AccountFlags)> {
        let flags = session.account_flags(entry, conn).await?;
        let status = flags.to_status(self.schema.password_expired_flag());
        let info = if extended && self.schema.attribute(AttributeId::UserPwdLastSet).is_some() {
            Some(self.decoder.extended_info(conn, entry, flags).await?)
        } else {
            None
        };
        Ok((self.translator.build_user(entry, status, info)?, flags))
    }

    async fn build_users(
        &self,
        conn: &mut dyn DirectoryConnection,
        entries: Vec<DirectoryEntry>,
        limit: SearchLimit,
        keep: impl Fn(AccountFlags) -> bool,
    ) -> LdapResult<Vec<PersonUser>> {
        let mut session = self.decoder.session();
        let mut users = Vec::new();
        for entry in &entries {
            if limit.is_some_and(|l| users.len() >= l) {
                break;
            }
            let (user, flags) = self.build_user(conn, &mut session, entry, false).await?;
            if keep(flags) {
                users.push(user);
            }
        }
        Ok(users)
    }

    fn principal_object_id(&self, entry: &DirectoryEntry) -> LdapResult<Option<String>> {
        match self.translator.object_id(entry, AttributeId::UserObjectId)? {
            Some(id) => Ok(Some(id)),
            None => self.translator.object_id(entry, AttributeId::GroupObjectId),
        }
    }

    fn render_values(&self, entry: &DirectoryEntry, attribute: &str) -> Vec<String> {
        let mut values = entry.values(attribute).to_vec();
        values.extend(entry.binary_values(attribute).iter().map(|bytes| {
            Sid::from_bytes(bytes).map_or_else(|_| hex::encode(bytes), |sid| sid.to_string())
        }));
        values
    }

    // ========================================================================
    // Searches
    // ========================================================================

    async fn search_users(
        &self,
        search: &str,
        limit: SearchLimit,
        keep: impl Fn(AccountFlags) -> bool,
        filtered: bool,
    ) -> LdapResult<Vec<PersonUser>> {
        if limit == Some(0) {
            return Ok(Vec::new());
        }
        let filter = self.criteria_filter(FilterOp::AllUsers, FilterOp::UserByCriteria, search)?;
        let attributes = self.user_lookup_attributes(&[]);
        let attributes: Vec<&str> = attributes.iter().map(String::as_str).collect();
        let request = self.subtree(self.config.user_base_dn.as_str(), filter, &attributes);

        let mut conn = self.pool.get().await?;
        // Status filters apply after the search, so the search itself is unbounded.
        let search_limit = if filtered { None } else { limit };
        let entries = self.engine.paged_search(&mut conn, &request, search_limit).await?;
        self.build_users(&mut conn, entries, limit, keep).await
    }

    async fn members(
        &self,
        conn: &mut dyn DirectoryConnection,
        group: &PrincipalId,
        filter: &str,
        attributes: &[&str],
        limit: SearchLimit,
    ) -> LdapResult<Vec<DirectoryEntry>> {
        let group = self.translator.normalize(group)?;
        let group_entry = self
            .find_group_entry(conn, &group)
            .await?
            .ok_or_else(|| LdapError::invalid_principal("group not found", group.upn()))?;

        let mut members = Vec::new();
        for dn in self.groups.member_dns(conn, group_entry.dn()).await? {
            if limit.is_some_and(|l| members.len() >= l) {
                break;
            }
            let request = SearchRequest::new(dn.as_str(), SearchScope::Base, filter, attributes);
            match self.engine.search(conn, &request).await {
                Ok(entries) => members.extend(entries),
                Err(LdapError::NoSuchObject(_)) => {
                    tracing::debug!(member = %dn, "Skipping dangling group member");
                }
                Err(e) => return Err(e),
            }
        }
        if let Some(limit) = limit {
            members.truncate(limit);
        }
        Ok(members)
    }

    async fn parent_groups(
        &self,
        principal: &PrincipalId,
        nested: bool,
    ) -> LdapResult<PrincipalGroupLookupInfo> {
        let principal = self.translator.normalize(principal)?;
        let mut conn = self.pool.get().await?;
        let entry = self.find_principal_entry(&mut conn, &principal).await?;
        let groups = self.groups.parent_groups(&mut conn, &entry, nested).await?;
        Ok(PrincipalGroupLookupInfo {
            groups,
            principal_object_id: self.principal_object_id(&entry)?,
        })
    }
}

impl IdentityProvider for LdapIdentityProvider {
    fn domain(&self) -> &str {
        &self.config.name
    }

    fn alias(&self) -> Option<&str> {
        self.translator.alias()
    }

    async fn probe_connection(&self) -> FederationResult<()> {
        Ok(self.pool.test_connection().await?)
    }

    async fn authenticate(
        &self,
        principal: &PrincipalId,
        password: &str,
    ) -> FederationResult<PrincipalId> {
        let principal = self.translator.normalize(principal)?;
        if password.is_empty() {
            return Err(FederationError::auth_failed("empty password"));
        }

        let attributes = self.user_lookup_attributes(&[]);
        let entry = {
            let mut conn = self.pool.get().await?;
            self.find_account_entry(&mut conn, &principal, &attributes).await?
        };
        let name = self.translator.account_name(&entry, AttributeId::UserAccountName)?;

        let credentials = BindCredentials::new(entry.dn(), password);
        match self.pool.connect_as(&credentials).await {
            Ok(conn) => conn.discard().await,
            Err(e) => {
                tracing::debug!(principal = %principal, error = %e, "Password check failed");
                return Err(e.into());
            }
        }

        Ok(PrincipalId::new(name, self.translator.entry_domain(&entry)))
    }

    async fn find_user(&self, principal: &PrincipalId) -> FederationResult<PersonUser> {
        let principal = self.translator.normalize(principal)?;
        let attributes = self.user_lookup_attributes(&[]);
        let mut conn = self.pool.get().await?;
        let entry = self.find_account_entry(&mut conn, &principal, &attributes).await?;
        let mut session = self.decoder.session();
        let (user, _) = self.build_user(&mut conn, &mut session, &entry, true).await?;
        Ok(user)
    }

    async fn find_user_by_object_id(&self, object_id: &str) -> FederationResult<PersonUser> {
        let attributes = self.user_lookup_attributes(&[]);
        let attributes: Vec<&str> = attributes.iter().map(String::as_str).collect();
        let mut conn = self.pool.get().await?;
        let entry = self
            .find_by_object_id(
                &mut conn,
                FilterOp::UserByObjectId,
                self.config.user_base_dn.as_str(),
                object_id,
                &attributes,
            )
            .await?;
        let mut session = self.decoder.session();
        let (user, _) = self.build_user(&mut conn, &mut session, &entry, true).await?;
        Ok(user)
    }

    async fn find_users(
        &self,
        search: &str,
        limit: SearchLimit,
    ) -> FederationResult<Vec<PersonUser>> {
        Ok(self.search_users(search, limit, |_| true, false).await?)
    }

    async fn find_users_in_group(
        &self,
        group: &PrincipalId,
        search: &str,
        limit: SearchLimit,
    ) -> FederationResult<Vec<PersonUser>> {
        if limit == Some(0) {
            return Ok(Vec::new());
        }
        let filter = self.criteria_filter(FilterOp::AllUsers, FilterOp::UserByCriteria, search)?;
        let attributes = self.user_lookup_attributes(&[]);
        let attributes: Vec<&str> = attributes.iter().map(String::as_str).collect();

        let mut conn = self.pool.get().await?;
        let entries = self
            .members(&mut conn, group, &filter, &attributes, limit)
            .await?;
        Ok(self.build_users(&mut conn, entries, limit, |_| true).await?)
    }

    async fn find_disabled_users(
        &self,
        search: &str,
        limit: SearchLimit,
    ) -> FederationResult<Vec<PersonUser>> {
        Ok(self
            .search_users(
                search,
                limit,
                |flags| flags.contains(AccountFlags::ACCOUNT_DISABLED),
                true,
            )
            .await?)
    }

    async fn find_locked_users(
        &self,
        search: &str,
        limit: SearchLimit,
    ) -> FederationResult<Vec<PersonUser>> {
        Ok(self
            .search_users(
                search,
                limit,
                |flags| flags.contains(AccountFlags::LOCKED),
                true,
            )
            .await?)
    }

    async fn find_group(&self, group: &PrincipalId) -> FederationResult<Option<Group>> {
        let group = self.translator.normalize(group)?;
        let mut conn = self.pool.get().await?;
        Ok(self
            .find_group_entry(&mut conn, &group)
            .await?
            .map(|entry| self.translator.build_group(&entry, true))
            .transpose()?)
    }

    async fn find_group_by_object_id(&self, object_id: &str) -> FederationResult<Group> {
        let attributes = self.translator.group_attributes();
        let mut conn = self.pool.get().await?;
        let entry = self
            .find_by_object_id(
                &mut conn,
                FilterOp::GroupByObjectId,
                self.config.group_base_dn.as_str(),
                object_id,
                &attributes,
            )
            .await?;
        Ok(self.translator.build_group(&entry, true)?)
    }

    async fn find_groups(&self, search: &str, limit: SearchLimit) -> FederationResult<Vec<Group>> {
        if limit == Some(0) {
            return Ok(Vec::new());
        }
        let filter = self.criteria_filter(FilterOp::AllGroups, FilterOp::GroupByCriteria, search)?;
        let attributes = self.translator.group_attributes();
        let request = self.subtree(self.config.group_base_dn.as_str(), filter, &attributes);

        let mut conn = self.pool.get().await?;
        let entries = self.engine.paged_search(&mut conn, &request, limit).await?;
        entries
            .iter()
            .map(|entry| Ok(self.translator.build_group(entry, true)?))
            .collect()
    }

    async fn find_groups_in_group(
        &self,
        group: &PrincipalId,
        search: &str,
        limit: SearchLimit,
    ) -> FederationResult<Vec<Group>> {
        if limit == Some(0) {
            return Ok(Vec::new());
        }
        let filter = self.criteria_filter(FilterOp::AllGroups, FilterOp::GroupByCriteria, search)?;
        let attributes = self.translator.group_attributes();

        let mut conn = self.pool.get().await?;
        let entries = self
            .members(&mut conn, group, &filter, &attributes, limit)
            .await?;
        entries
            .iter()
            .map(|entry| Ok(self.translator.build_group(entry, true)?))
            .collect()
    }

    async fn find_direct_parent_groups(
        &self,
        principal: &PrincipalId,
    ) -> FederationResult<PrincipalGroupLookupInfo> {
        Ok(self.parent_groups(principal, false).await?)
    }

    async fn find_nested_parent_groups(
        &self,
        principal: &PrincipalId,
    ) -> FederationResult<PrincipalGroupLookupInfo> {
        Ok(self.parent_groups(principal, true).await?)
    }

    async fn get_attributes(
        &self,
        principal: &PrincipalId,
        attributes: &[String],
    ) -> FederationResult<Vec<AttributeValuePair>> {
        let principal = self.translator.normalize(principal)?;

        let mut mapped = Vec::new();
        for name in attributes {
            if [SUBJECT_TYPE_ATTRIBUTE, UPN_ATTRIBUTE, MEMBER_OF_ATTRIBUTE].contains(&name.as_str()) {
                continue;
            }
            let attribute = self.config.attribute_map.get(name).ok_or_else(|| {
                FederationError::invalid_argument(format!("no mapping for attribute {name}"))
            })?;
            mapped.push(attribute.as_str());
        }

        let lookup = self.user_lookup_attributes(&mapped);
        let mut conn = self.pool.get().await?;
        let entry = self.find_account_entry(&mut conn, &principal, &lookup).await?;
        let name = self.translator.account_name(&entry, AttributeId::UserAccountName)?;
        let groups = self.groups.parent_groups(&mut conn, &entry, true).await?;

        let mut pairs = Vec::with_capacity(attributes.len() + 1);
        for requested in attributes {
            let values = match requested.as_str() {
                SUBJECT_TYPE_ATTRIBUTE => vec!["false".to_string()],
                UPN_ATTRIBUTE => self.translator.upn(&entry, &name).into_iter().collect(),
                MEMBER_OF_ATTRIBUTE => groups.iter().map(|g| g.id.netbios()).collect(),
                other => match self.config.attribute_map.get(other) {
                    Some(attribute) => self.render_values(&entry, attribute),
                    None => Vec::new(),
                },
            };
            pairs.push(AttributeValuePair::new(requested.clone(), values));
        }

        let object_ids = self
            .principal_object_id(&entry)?
            .into_iter()
            .chain(groups.iter().filter_map(|g| g.object_id.clone()))
            .collect();
        pairs.push(AttributeValuePair::new(GROUP_OBJECT_IDS_ATTRIBUTE, object_ids));
        Ok(pairs)
    }

    async fn account_status(&self, principal: &PrincipalId) -> FederationResult<AccountStatus> {
        let principal = self.translator.normalize(principal)?;
        let attributes = self.user_lookup_attributes(&[]);
        let mut conn = self.pool.get().await?;
        let entry = self.find_account_entry(&mut conn, &principal, &attributes).await?;
        Ok(self.decoder.session().status(&entry, &mut conn).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderFlags, SchemaKind};
    use crate::status::PERMANENT_LOCKOUT;
    use crate::testing::MemoryDirectory;

    const PEOPLE: &str = "ou=people,dc=example,dc=com";
    const GROUPS: &str = "ou=groups,dc=example,dc=com";
    const URL: &str = "ldaps://ldap.example.com:636";

    fn person(uid: &str, given: &str, sn: &str) -> DirectoryEntry {
        DirectoryEntry::new(format!("uid={uid},{PEOPLE}"))
            .with_values("objectClass", ["inetOrgPerson"])
            .with_values("uid", [uid])
            .with_values("givenName", [given])
            .with_values("sn", [sn])
            .with_values("mail", [format!("{uid}@example.com")])
            .with_values("entryUUID", [format!("uuid-{uid}")])
    }

    fn group(cn: &str, members: &[String]) -> DirectoryEntry {
        DirectoryEntry::new(format!("cn={cn},{GROUPS}"))
            .with_values("objectClass", ["groupOfUniqueNames"])
            .with_values("cn", [cn])
            .with_values("entryUUID", [format!("uuid-{cn}")])
            .with_values("uniqueMember", members.iter().cloned())
    }

    fn dn(uid: &str) -> String {
        format!("uid={uid},{PEOPLE}")
    }

    /// jdoe -> ops -> admins; asmith is disabled, bwong permanently locked.
    fn directory() -> MemoryDirectory {
        let directory = MemoryDirectory::new();
        directory.add(DirectoryEntry::new(PEOPLE).with_values("objectClass", ["organizationalUnit"]));
        directory.add(DirectoryEntry::new(GROUPS).with_values("objectClass", ["organizationalUnit"]));
        directory.add(person("jdoe", "John", "Doe"));
        directory.add(person("asmith", "Ann", "Smith").with_values("userAccountControl", ["2"]));
        directory.add(
            person("bwong", "Bo", "Wong").with_values("pwdAccountLockedTime", [PERMANENT_LOCKOUT]),
        );
        directory.add(group("ops", &[dn("jdoe"), dn("asmith")]));
        directory.add(group("admins", &[format!("cn=ops,{GROUPS}")]));
        directory.set_password(&dn("jdoe"), "correct horse");
        directory
    }

    fn config() -> LdapConfig {
        LdapConfig::builder()
            .name("example.com")
            .alias("EXAMPLE")
            .connection_url(URL)
            .bind_dn("cn=svc,dc=example,dc=com")
            .bind_credential("secret")
            .user_base_dn(PEOPLE)
            .group_base_dn(GROUPS)
            .map_attribute("email", "mail")
            .map_attribute("id", "entryUUID")
            .build()
            .unwrap()
    }

    fn provider(directory: &MemoryDirectory) -> LdapIdentityProvider {
        LdapIdentityProvider::with_transport(config(), Arc::new(directory.clone()), None).unwrap()
    }

    fn jdoe() -> PrincipalId {
        PrincipalId::new("jdoe", "example.com")
    }

    #[test]
    fn site_affinity_requires_topology() {
        let config = LdapConfig {
            flags: ProviderFlags {
                site_affinity: true,
                ..ProviderFlags::default()
            },
            ..config()
        };
        assert!(LdapIdentityProvider::new(config.clone()).is_err());
        let err = LdapIdentityProvider::with_transport(config, Arc::new(MemoryDirectory::new()), None)
            .err()
            .unwrap();
        assert!(matches!(err, LdapError::Configuration(_)));
    }

    #[tokio::test]
    async fn authenticate_returns_canonical_principal() {
        let directory = directory();
        let provider = provider(&directory);

        let id = provider
            .authenticate(&PrincipalId::new("jdoe", "EXAMPLE"), "correct horse")
            .await
            .unwrap();
        assert_eq!(id, jdoe());
        assert_eq!(provider.pool().idle_count(), 1);
        assert_eq!(directory.stats().closes, 1);
    }

    #[tokio::test]
    async fn authenticate_rejects_bad_password() {
        let directory = directory();
        let provider = provider(&directory);

        let err = provider.authenticate(&jdoe(), "wrong").await.unwrap_err();
        assert!(err.is_auth_error());
        let err = provider.authenticate(&jdoe(), "").await.unwrap_err();
        assert!(err.is_auth_error());
    }

    #[tokio::test]
    async fn foreign_domain_is_rejected_before_connecting() {
        let directory = directory();
        let provider = provider(&directory);

        let err = provider
            .find_user(&PrincipalId::new("jdoe", "other.com"))
            .await
            .unwrap_err();
        assert!(err.is_invalid_principal());
        assert!(directory.connect_attempts().is_empty());
    }

    #[tokio::test]
    async fn find_user_translates_entry() {
        let provider = provider(&directory());

        let user = provider.find_user(&jdoe()).await.unwrap();
        assert_eq!(user.id, jdoe());
        assert_eq!(user.alias, Some(PrincipalId::new("jdoe", "EXAMPLE")));
        assert_eq!(user.object_id.as_deref(), Some("uuid-jdoe"));
        assert_eq!(user.detail.user_principal_name.as_deref(), Some("jdoe@example.com"));
        assert_eq!(user.detail.first_name.as_deref(), Some("John"));
        assert!(!user.disabled && !user.locked);

        let by_id = provider.find_user_by_object_id("uuid-jdoe").await.unwrap();
        assert_eq!(by_id.id, user.id);
    }

    #[tokio::test]
    async fn missing_and_duplicate_users_are_invalid_principals() {
        let directory = directory();
        let provider = provider(&directory);

        let err = provider
            .find_user(&PrincipalId::new("nobody", "example.com"))
            .await
            .unwrap_err();
        assert!(err.is_invalid_principal());

        directory.add(
            DirectoryEntry::new("uid=jdoe,ou=contractors,ou=people,dc=example,dc=com")
                .with_values("objectClass", ["inetOrgPerson"])
                .with_values("uid", ["jdoe"]),
        );
        let err = provider.find_user(&jdoe()).await.unwrap_err();
        assert!(err.is_invalid_principal());
    }

    #[tokio::test]
    async fn criteria_searches_honor_limits() {
        let provider = provider(&directory());

        let all = provider.find_users("", None).await.unwrap();
        assert_eq!(all.len(), 3);

        let smith = provider.find_users("mit", None).await.unwrap();
        assert_eq!(smith.len(), 1);
        assert_eq!(smith[0].id.name(), "asmith");

        assert_eq!(provider.find_users("", Some(2)).await.unwrap().len(), 2);
        assert!(provider.find_users("", Some(0)).await.unwrap().is_empty());

        let result = provider.find("", Some(4)).await.unwrap();
        assert_eq!(result.users.len(), 2);
        assert_eq!(result.groups.len(), 2);
    }

    #[tokio::test]
    async fn search_text_is_escaped() {
        let provider = provider(&directory());
        let users = provider.find_users("*)(uid=*", None).await.unwrap();
        assert!(users.is_empty());
    }

    #[tokio::test]
    async fn disabled_and_locked_users_are_filtered_by_status() {
        let provider = provider(&directory());

        let disabled = provider.find_disabled_users("", None).await.unwrap();
        assert_eq!(disabled.len(), 1);
        assert_eq!(disabled[0].id.name(), "asmith");
        assert!(disabled[0].disabled);

        let locked = provider.find_locked_users("", None).await.unwrap();
        assert_eq!(locked.len(), 1);
        assert_eq!(locked[0].id.name(), "bwong");

        assert!(provider.find_locked_users("doe", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn group_lookups() {
        let provider = provider(&directory());

        let ops = provider
            .find_group(&PrincipalId::new("ops", "example.com"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ops.object_id.as_deref(), Some("uuid-ops"));
        assert!(ops.detail.is_some());

        assert!(provider
            .find_group(&PrincipalId::new("missing", "example.com"))
            .await
            .unwrap()
            .is_none());

        let by_id = provider.find_group_by_object_id("uuid-admins").await.unwrap();
        assert_eq!(by_id.id.name(), "admins");

        let found = provider.find_groups("adm", None).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn group_members_are_split_by_kind() {
        let provider = provider(&directory());
        let ops = PrincipalId::new("ops", "example.com");
        let admins = PrincipalId::new("admins", "example.com");

        let users = provider.find_users_in_group(&ops, "", None).await.unwrap();
        let mut names: Vec<&str> = users.iter().map(|u| u.id.name()).collect();
        names.sort_unstable();
        assert_eq!(names, ["asmith", "jdoe"]);

        assert_eq!(provider.find_users_in_group(&ops, "", Some(1)).await.unwrap().len(), 1);
        assert_eq!(provider.find_users_in_group(&ops, "doe", None).await.unwrap().len(), 1);
        assert!(provider.find_users_in_group(&admins, "", None).await.unwrap().is_empty());

        let groups = provider.find_groups_in_group(&admins, "", None).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].id.name(), "ops");
    }

    #[tokio::test]
    async fn dangling_members_are_skipped() {
        let directory = directory();
        directory.add(group("ghosts", &[dn("gone"), dn("jdoe")]));
        let provider = provider(&directory);

        let users = provider
            .find_users_in_group(&PrincipalId::new("ghosts", "example.com"), "", None)
            .await
            .unwrap();
        assert_eq!(users.len(), 1);
    }

    #[tokio::test]
    async fn direct_and_nested_parent_groups() {
        let provider = provider(&directory());

        let direct = provider.find_direct_parent_groups(&jdoe()).await.unwrap();
        assert_eq!(direct.groups.len(), 1);
        assert_eq!(direct.principal_object_id.as_deref(), Some("uuid-jdoe"));

        let nested = provider.find_nested_parent_groups(&jdoe()).await.unwrap();
        let mut names: Vec<&str> = nested.groups.iter().map(|g| g.id.name()).collect();
        names.sort_unstable();
        assert_eq!(names, ["admins", "ops"]);

        let of_group = provider
            .find_nested_parent_groups(&PrincipalId::new("ops", "example.com"))
            .await
            .unwrap();
        assert_eq!(of_group.principal_object_id.as_deref(), Some("uuid-ops"));
        assert_eq!(of_group.groups.len(), 1);
    }

    #[tokio::test]
    async fn attributes_include_special_values_and_group_ids() {
        let provider = provider(&directory());
        let requested: Vec<String> = ["email", "subjectType", "userPrincipalName", "memberOf"]
            .iter()
            .map(ToString::to_string)
            .collect();

        let pairs = provider.get_attributes(&jdoe(), &requested).await.unwrap();
        assert_eq!(pairs.len(), 5);
        assert_eq!(pairs[0].values, ["jdoe@example.com"]);
        assert_eq!(pairs[1].values, ["false"]);
        assert_eq!(pairs[2].values, ["jdoe@example.com"]);

        let mut member_of = pairs[3].values.clone();
        member_of.sort();
        assert_eq!(member_of, ["example.com\\admins", "example.com\\ops"]);

        let ids = &pairs[4];
        assert_eq!(ids.name, GROUP_OBJECT_IDS_ATTRIBUTE);
        assert_eq!(ids.values[0], "uuid-jdoe");
        assert_eq!(ids.values.len(), 3);
        assert!(ids.values.contains(&"uuid-admins".to_string()));
    }

    #[tokio::test]
    async fn unmapped_attribute_is_invalid_argument() {
        let directory = directory();
        let provider = provider(&directory);

        let err = provider
            .get_attributes(&jdoe(), &["shoeSize".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, FederationError::InvalidArgument(_)));
        assert!(directory.connect_attempts().is_empty());
    }

    #[tokio::test]
    async fn account_status_checks() {
        let provider = provider(&directory());

        let locked = PrincipalId::new("bwong", "example.com");
        assert!(provider.account_status(&locked).await.unwrap().locked);
        let err = provider.check_account_status(&locked).await.unwrap_err();
        assert!(err.is_user_actionable());

        let disabled = PrincipalId::new("asmith", "example.com");
        assert!(!provider.is_active(&disabled).await.unwrap());
        assert!(provider.is_active(&jdoe()).await.unwrap());
        provider.check_account_status(&jdoe()).await.unwrap();
    }

    #[tokio::test]
    async fn paging_rejection_is_negotiated_once() {
        let directory = directory();
        directory.reject_paging();
        let provider = provider(&directory);

        assert_eq!(provider.find_users("", None).await.unwrap().len(), 3);
        assert_eq!(provider.find_groups("", None).await.unwrap().len(), 2);
        assert_eq!(provider.capability(), PagedCapability::Unsupported);
        assert_eq!(directory.stats().paging_rejections, 1);
    }

    #[tokio::test]
    async fn probe_reports_unreachable_directory() {
        let reachable = directory();
        provider(&reachable).probe_connection().await.unwrap();

        let unreachable = MemoryDirectory::new();
        unreachable.refuse(URL);
        let err = provider(&unreachable).probe_connection().await.unwrap_err();
        assert!(err.is_connectivity_error());
    }

    // ========================================================================
    // Active Directory
    // ========================================================================

    const AD_USERS: &str = "CN=Users,DC=corp,DC=example,DC=com";
    const DOMAIN_SID: &str = "S-1-5-21-1-2-3";

    fn sid(rid: u32) -> Vec<u8> {
        Sid::parse(&format!("{DOMAIN_SID}-{rid}")).unwrap().to_bytes()
    }

    fn ad_group(name: &str, rid: u32, members: &[&str]) -> DirectoryEntry {
        DirectoryEntry::new(format!("CN={name},{AD_USERS}"))
            .with_values("objectClass", ["top", "group"])
            .with_values("sAMAccountName", [name])
            .with_binary("objectSid", sid(rid))
            .with_values("member", members.iter().map(ToString::to_string))
    }

    fn ad_provider() -> (MemoryDirectory, LdapIdentityProvider) {
        let jdoe_dn = format!("CN=John Doe,{AD_USERS}");
        let directory = MemoryDirectory::new();
        directory.add(
            DirectoryEntry::new("DC=corp,DC=example,DC=com")
                .with_values("objectClass", ["domain"])
                .with_values("maxPwdAge", ["-36288000000000"]),
        );
        directory.add(
            DirectoryEntry::new(jdoe_dn.as_str())
                .with_values("objectClass", ["top", "person", "user"])
                .with_values("sAMAccountName", ["jdoe"])
                .with_values("userPrincipalName", ["john.doe@corp.example.com"])
                .with_values("userAccountControl", ["512"])
                .with_values("primaryGroupID", ["513"])
                .with_binary("objectSid", sid(1104)),
        );
        directory.add(ad_group("Domain Users", 513, &[]));
        directory.add(ad_group("Engineering", 1200, &[jdoe_dn.as_str()]));

        let config = LdapConfig::builder()
            .name("corp.example.com")
            .schema(SchemaKind::ActiveDirectory)
            .connection_url("ldaps://dc1.corp.example.com:636")
            .bind_dn("CN=svc,CN=Users,DC=corp,DC=example,DC=com")
            .bind_credential("secret")
            .user_base_dn(AD_USERS)
            .group_base_dn(AD_USERS)
            .build()
            .unwrap();
        let provider =
            LdapIdentityProvider::with_transport(config, Arc::new(directory.clone()), None).unwrap();
        (directory, provider)
    }

    #[tokio::test]
    async fn ad_user_resolves_by_account_name_and_upn() {
        let (_, provider) = ad_provider();

        let user = provider
            .find_user(&PrincipalId::new("jdoe", "corp.example.com"))
            .await
            .unwrap();
        assert_eq!(user.object_id, Some(format!("{DOMAIN_SID}-1104")));
        assert_eq!(
            user.detail.user_principal_name.as_deref(),
            Some("john.doe@corp.example.com")
        );
        assert_eq!(user.detail.pwd_lifetime, Some(3_628_800));

        let by_upn = provider
            .find_user(&PrincipalId::new("john.doe", "corp.example.com"))
            .await
            .unwrap();
        assert_eq!(by_upn.id.name(), "jdoe");
    }

    #[tokio::test]
    async fn ad_groups_include_primary_group() {
        let (_, provider) = ad_provider();
        let jdoe = PrincipalId::new("jdoe", "corp.example.com");

        let info = provider.find_direct_parent_groups(&jdoe).await.unwrap();
        let mut names: Vec<&str> = info.groups.iter().map(|g| g.id.name()).collect();
        names.sort_unstable();
        assert_eq!(names, ["Domain Users", "Engineering"]);

        let pairs = provider
            .get_attributes(&jdoe, &["memberOf".to_string()])
            .await
            .unwrap();
        assert!(pairs[0]
            .values
            .iter()
            .any(|v| v.eq_ignore_ascii_case("corp.example.com\\Domain Users")));
        assert_eq!(pairs[1].values[0], format!("{DOMAIN_SID}-1104"));
        assert!(pairs[1].values.contains(&format!("{DOMAIN_SID}-513")));
    }
}
