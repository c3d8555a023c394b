//! Group membership resolution.
//!
//! Parent groups are found by searching for groups that list a DN as a
//! member. Nested resolution repeats that search for every group found,
//! tracking visited DNs so membership cycles terminate. Directories that
//! support the in-chain matching rule answer nested lookups in one query.

use std::collections::HashSet;
use std::sync::Arc;

use kc_federation::Group;

use crate::config::{LdapConfig, ProviderFlags, SearchScope};
use crate::error::{LdapError, LdapResult};
use crate::schema::{AttributeId, FilterOp, SchemaMapping};
use crate::search::{DirectoryEntry, SearchEngine};
use crate::transport::{DirectoryConnection, SearchRequest};
use crate::translator::{PrincipalTranslator, Sid};

fn dn_key(dn: &str) -> String {
    dn.split(',')
        .map(|rdn| rdn.trim().to_lowercase())
        .collect::<Vec<_>>()
        .join(",")
}

/// Resolves direct and nested parent groups and group members.
#[derive(Debug)]
pub struct NestedGroupResolver {
    schema: Arc<dyn SchemaMapping>,
    engine: Arc<SearchEngine>,
    translator: PrincipalTranslator,
    base_dn: String,
    domain_dn: String,
    flags: ProviderFlags,
}

impl NestedGroupResolver {
    /// Creates a resolver for one identity source.
    #[must_use]
    pub fn new(
        config: &LdapConfig,
        schema: Arc<dyn SchemaMapping>,
        engine: Arc<SearchEngine>,
        translator: PrincipalTranslator,
    ) -> Self {
        Self {
            schema,
            engine,
            translator,
            base_dn: config.nested_group_base_dn(),
            domain_dn: config.domain_dn(),
            flags: config.flags,
        }
    }

    /// Groups listing `member_dn` as a direct member.
    pub async fn direct_parents(
        &self,
        conn: &mut dyn DirectoryConnection,
        member_dn: &str,
    ) -> LdapResult<Vec<DirectoryEntry>> {
        let filter = self.schema.build_filter(FilterOp::DirectParentGroups, member_dn)?;
        let request = SearchRequest::new(
            self.base_dn.as_str(),
            SearchScope::Subtree,
            filter,
            &self.translator.group_attributes(),
        );
        self.engine.paged_search(conn, &request, None).await
    }

    /// Parent groups of `principal`.
    ///
    /// With `nested` the groups of groups are included, unless the source
    /// is configured for direct groups only. A user's primary group is
    /// always part of the result.
    #[tracing::instrument(skip(self, conn, principal), fields(dn = %principal.dn()))]
    pub async fn parent_groups(
        &self,
        conn: &mut dyn DirectoryConnection,
        principal: &DirectoryEntry,
        nested: bool,
    ) -> LdapResult<HashSet<Group>> {
        let nested = nested && !self.flags.direct_groups_only;
        let mut groups = HashSet::new();
        let mut visited: HashSet<String> = HashSet::from([dn_key(principal.dn())]);
        let mut pending = vec![principal.dn().to_string()];

        if let Some(primary) = self.primary_group(conn, principal).await? {
            groups.insert(self.translator.build_group(&primary, false)?);
            if nested && visited.insert(dn_key(primary.dn())) {
                pending.push(primary.dn().to_string());
            }
        }

        if nested && self.flags.uses_in_chain() {
            if self.schema.filter_template(FilterOp::NestedParentGroups).is_some() {
                for dn in pending {
                    for entry in self.in_chain_parents(conn, &dn).await? {
                        groups.insert(self.translator.build_group(&entry, false)?);
                    }
                }
                return Ok(groups);
            }
            tracing::debug!("Schema has no in-chain filter; traversing groups level by level");
        }

        while let Some(dn) = pending.pop() {
            for entry in self.direct_parents(conn, &dn).await? {
                groups.insert(self.translator.build_group(&entry, false)?);
                if nested && visited.insert(dn_key(entry.dn())) {
                    pending.push(entry.dn().to_string());
                }
            }
        }

        tracing::debug!(count = groups.len(), "Resolved parent groups");
        Ok(groups)
    }

    async fn in_chain_parents(
        &self,
        conn: &mut dyn DirectoryConnection,
        member_dn: &str,
    ) -> LdapResult<Vec<DirectoryEntry>> {
        let filter = self.schema.build_filter(FilterOp::NestedParentGroups, member_dn)?;
        let request = SearchRequest::new(
            self.base_dn.as_str(),
            SearchScope::Subtree,
            filter,
            &self.translator.group_attributes(),
        );
        self.engine.paged_search(conn, &request, None).await
    }

    /// Primary group of a user, located by the user's SID with the primary
    /// group id as its last sub-authority.
    pub async fn primary_group(
        &self,
        conn: &mut dyn DirectoryConnection,
        user: &DirectoryEntry,
    ) -> LdapResult<Option<DirectoryEntry>> {
        if !self.schema.object_id_is_sid() {
            return Ok(None);
        }
        let Some(rid_attribute) = self.schema.attribute(AttributeId::UserPrimaryGroupId) else {
            return Ok(None);
        };
        let Some(rid) = user.integer(rid_attribute)? else {
            return Ok(None);
        };
        let Some(sid_bytes) = self
            .schema
            .attribute(AttributeId::UserObjectId)
            .and_then(|a| user.binary(a))
        else {
            return Ok(None);
        };

        let rid = u32::try_from(rid)
            .map_err(|_| LdapError::invalid_value(rid_attribute, format!("{rid} is not a RID")))?;
        let sid = Sid::from_bytes(sid_bytes)?.with_rid(rid);
        let filter = self.schema.build_filter(FilterOp::GroupByObjectId, &sid.to_string())?;
        let request = SearchRequest::new(
            self.domain_dn.as_str(),
            SearchScope::Subtree,
            filter,
            &self.translator.group_attributes(),
        )
        .with_size_limit(1);

        let mut entries = self.engine.search(conn, &request).await?;
        Ok(entries.pop())
    }

    /// Member DNs of `group_dn`, following ranges where the directory uses
    /// them.
    pub async fn member_dns(
        &self,
        conn: &mut dyn DirectoryConnection,
        group_dn: &str,
    ) -> LdapResult<Vec<String>> {
        let attribute = self.schema.required_attribute(AttributeId::GroupMembers)?;
        if self.schema.ranged_members() {
            return self.engine.ranged_values(conn, group_dn, attribute).await;
        }

        let request = SearchRequest::new(group_dn, SearchScope::Base, "(objectClass=*)", &[attribute]);
        let entries = self.engine.search(conn, &request).await?;
        Ok(entries
            .first()
            .map(|e| e.values(attribute).to_vec())
            .unwrap_or_default())
    }
}
