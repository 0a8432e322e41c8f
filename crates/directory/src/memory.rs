use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use portal_contracts::{ContactRecord, OrganizationMembership, ProfileRecord};

use crate::{DirectoryError, PrincipalDirectory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Query {
    Contact,
    Profile,
    Memberships,
    Ping,
}

impl Query {
    pub fn as_str(self) -> &'static str {
        match self {
            Query::Contact => "contact_by_identity",
            Query::Profile => "profile_by_identity",
            Query::Memberships => "memberships_by_identity",
            Query::Ping => "ping",
        }
    }
}

#[derive(Default)]
struct Tables {
    contacts: HashMap<String, Vec<ContactRecord>>,
    profiles: HashMap<String, ProfileRecord>,
    memberships: HashMap<String, Vec<i64>>,
    failing: HashSet<Query>,
    calls: Vec<Query>,
}

/// Fixture-backed directory. Contacts keep every inserted row so duplicate
/// rows surface as `Ambiguous`, the same as the Postgres lookups.
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    inner: Arc<Mutex<Tables>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn with_contact(self, identity_id: &str, id: i64, contact_types_id: Option<i64>) -> Self {
        self.tables()
            .contacts
            .entry(identity_id.to_string())
            .or_default()
            .push(ContactRecord {
                id,
                contact_types_id,
            });
        self
    }

    pub fn with_profile(self, identity_id: &str, role: Option<&str>) -> Self {
        self.tables().profiles.insert(
            identity_id.to_string(),
            ProfileRecord {
                role: role.map(str::to_string),
            },
        );
        self
    }

    pub fn with_membership(self, identity_id: &str, org_id: i64) -> Self {
        self.tables()
            .memberships
            .entry(identity_id.to_string())
            .or_default()
            .push(org_id);
        self
    }

    /// Makes every later call of `query` fail with `Unavailable`.
    pub fn failing(self, query: Query) -> Self {
        self.tables().failing.insert(query);
        self
    }

    /// Queries issued so far, in order.
    pub fn calls(&self) -> Vec<Query> {
        self.tables().calls.clone()
    }

    fn record(&self, query: Query) -> Result<std::sync::MutexGuard<'_, Tables>, DirectoryError> {
        let mut tables = self.tables();
        tables.calls.push(query);
        if tables.failing.contains(&query) {
            return Err(DirectoryError::Unavailable(format!(
                "{} failure injected",
                query.as_str()
            )));
        }
        Ok(tables)
    }
}

#[async_trait]
impl PrincipalDirectory for MemoryDirectory {
    async fn contact_by_identity(
        &self,
        identity_id: &str,
    ) -> Result<Option<ContactRecord>, DirectoryError> {
        let tables = self.record(Query::Contact)?;
        match tables.contacts.get(identity_id).map(Vec::as_slice) {
            None | Some([]) => Ok(None),
            Some([contact]) => Ok(Some(*contact)),
            Some(_) => Err(DirectoryError::Ambiguous {
                query: Query::Contact.as_str(),
            }),
        }
    }

    async fn profile_by_identity(
        &self,
        identity_id: &str,
    ) -> Result<Option<ProfileRecord>, DirectoryError> {
        let tables = self.record(Query::Profile)?;
        Ok(tables.profiles.get(identity_id).cloned())
    }

    async fn memberships_by_identity(
        &self,
        identity_id: &str,
    ) -> Result<Vec<OrganizationMembership>, DirectoryError> {
        let tables = self.record(Query::Memberships)?;
        let mut org_ids = tables
            .memberships
            .get(identity_id)
            .cloned()
            .unwrap_or_default();
        org_ids.sort();
        Ok(org_ids
            .into_iter()
            .map(|org_id| OrganizationMembership {
                identity_id: identity_id.to_string(),
                org_id,
            })
            .collect())
    }

    async fn ping(&self) -> Result<(), DirectoryError> {
        self.record(Query::Ping)?;
        Ok(())
    }
}
