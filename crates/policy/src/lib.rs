use std::collections::BTreeSet;

use portal_contracts::{
    OrganizationFilter, OrganizationMembership, PageKind, Principal, VisibilityScope,
};
use serde::{Deserialize, Serialize};

/// How the organizational list of an investor with memberships is filtered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrganizationScopeMode {
    /// Only organizations the investor belongs to.
    #[default]
    MemberOrgs,
    /// Every organization, regardless of membership. Legacy portal behavior.
    AllOrgs,
}

impl OrganizationScopeMode {
    pub fn parse(raw: &str) -> Result<Self, ParseScopeModeError> {
        match raw.trim() {
            "member-orgs" => Ok(OrganizationScopeMode::MemberOrgs),
            "all-orgs" => Ok(OrganizationScopeMode::AllOrgs),
            other => Err(ParseScopeModeError {
                message: format!(
                    "unknown organization scope mode `{}` (expected member-orgs or all-orgs)",
                    other
                ),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrganizationScopeMode::MemberOrgs => "member-orgs",
            OrganizationScopeMode::AllOrgs => "all-orgs",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseScopeModeError {
    message: String,
}

impl std::fmt::Display for ParseScopeModeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseScopeModeError {}

/// Organization memberships as seen by the caller at evaluation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipSnapshot {
    NotFetched,
    Fetched(Vec<OrganizationMembership>),
}

impl MembershipSnapshot {
    fn org_ids(&self) -> BTreeSet<i64> {
        match self {
            MembershipSnapshot::NotFetched => BTreeSet::new(),
            MembershipSnapshot::Fetched(memberships) => {
                memberships.iter().map(|m| m.org_id).collect()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccessPolicy {
    pub org_scope: OrganizationScopeMode,
}

impl AccessPolicy {
    pub fn new(org_scope: OrganizationScopeMode) -> Self {
        Self { org_scope }
    }

    /// Memberships only matter for investors on the investor page.
    pub fn needs_memberships(&self, principal: &Principal, page: PageKind) -> bool {
        page == PageKind::InvestorStatements && principal.is_investor()
    }

    pub fn evaluate(
        &self,
        principal: &Principal,
        page: PageKind,
        memberships: &MembershipSnapshot,
    ) -> VisibilityScope {
        match page {
            PageKind::AdminStatements => {
                if principal.is_admin() {
                    VisibilityScope::Unrestricted
                } else {
                    VisibilityScope::Denied
                }
            }
            PageKind::InvestorStatements => self.evaluate_investor_page(principal, memberships),
        }
    }

    fn evaluate_investor_page(
        &self,
        principal: &Principal,
        memberships: &MembershipSnapshot,
    ) -> VisibilityScope {
        let is_admin = principal.is_admin();
        let investor_id = principal
            .contact_id()
            .filter(|_| principal.is_investor());

        let Some(investor_id) = investor_id else {
            return if is_admin {
                VisibilityScope::Unrestricted
            } else {
                VisibilityScope::Denied
            };
        };

        let org_ids = memberships.org_ids();
        if !org_ids.is_empty() {
            let organizations = if is_admin || self.org_scope == OrganizationScopeMode::AllOrgs {
                OrganizationFilter::All
            } else {
                OrganizationFilter::Only(org_ids)
            };
            return VisibilityScope::Combined {
                investor_id,
                organizations,
            };
        }

        if is_admin {
            VisibilityScope::Unrestricted
        } else {
            VisibilityScope::ByInvestor { investor_id }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_contracts::{ContactRecord, Identity, ProfileRecord};

    fn principal(role: Option<&str>, contact_type_id: Option<i64>) -> Principal {
        Principal::new(
            Identity::new("user-1").expect("identity"),
            role.map(|r| ProfileRecord {
                role: Some(r.to_string()),
            }),
            Some(ContactRecord {
                id: 42,
                contact_types_id: contact_type_id,
            }),
        )
    }

    fn memberships(org_ids: &[i64]) -> MembershipSnapshot {
        MembershipSnapshot::Fetched(
            org_ids
                .iter()
                .map(|org_id| OrganizationMembership {
                    identity_id: "user-1".to_string(),
                    org_id: *org_id,
                })
                .collect(),
        )
    }

    #[test]
    fn non_admin_non_investor_is_denied_on_both_pages() {
        let policy = AccessPolicy::default();
        for role in [None, Some("standard"), Some("viewer"), Some("ADMIN")] {
            for contact_type in [None, Some(1), Some(7), Some(11), Some(13)] {
                let p = principal(role, contact_type);
                for page in [PageKind::AdminStatements, PageKind::InvestorStatements] {
                    assert_eq!(
                        policy.evaluate(&p, page, &memberships(&[1])),
                        VisibilityScope::Denied,
                        "role={:?} contact_type={:?} page={:?}",
                        role,
                        contact_type,
                        page
                    );
                }
            }
        }
    }

    #[test]
    fn principal_without_contact_or_role_is_denied() {
        let p = Principal::new(Identity::new("user-1").expect("identity"), None, None);
        let policy = AccessPolicy::default();
        assert_eq!(
            policy.evaluate(&p, PageKind::InvestorStatements, &MembershipSnapshot::NotFetched),
            VisibilityScope::Denied
        );
        assert!(!policy.needs_memberships(&p, PageKind::InvestorStatements));
    }

    #[test]
    fn admin_page_allows_admin_without_contact() {
        let p = Principal::new(
            Identity::new("user-1").expect("identity"),
            Some(ProfileRecord {
                role: Some("admin".to_string()),
            }),
            None,
        );
        assert_eq!(
            AccessPolicy::default().evaluate(
                &p,
                PageKind::AdminStatements,
                &MembershipSnapshot::NotFetched
            ),
            VisibilityScope::Unrestricted
        );
    }

    #[test]
    fn admin_page_ignores_investor_classification() {
        let p = principal(None, Some(12));
        assert_eq!(
            AccessPolicy::default().evaluate(&p, PageKind::AdminStatements, &memberships(&[1])),
            VisibilityScope::Denied
        );
        assert!(!AccessPolicy::default().needs_memberships(&p, PageKind::AdminStatements));
    }

    #[test]
    fn investor_without_memberships_sees_own_statements() {
        let p = principal(None, Some(12));
        let policy = AccessPolicy::default();
        assert!(policy.needs_memberships(&p, PageKind::InvestorStatements));
        assert_eq!(
            policy.evaluate(&p, PageKind::InvestorStatements, &memberships(&[])),
            VisibilityScope::ByInvestor { investor_id: 42 }
        );
        assert_eq!(
            policy.evaluate(&p, PageKind::InvestorStatements, &MembershipSnapshot::NotFetched),
            VisibilityScope::ByInvestor { investor_id: 42 }
        );
    }

    #[test]
    fn investor_with_memberships_gets_member_orgs_by_default() {
        let p = principal(Some("standard"), Some(12));
        let scope = AccessPolicy::default().evaluate(
            &p,
            PageKind::InvestorStatements,
            &memberships(&[9, 3, 9]),
        );
        assert_eq!(
            scope,
            VisibilityScope::Combined {
                investor_id: 42,
                organizations: OrganizationFilter::Only(BTreeSet::from([3, 9])),
            }
        );
        assert_eq!(scope.listings().len(), 2);
    }

    #[test]
    fn all_orgs_mode_leaves_organizational_list_unfiltered() {
        let p = principal(None, Some(12));
        let policy = AccessPolicy::new(OrganizationScopeMode::AllOrgs);
        assert_eq!(
            policy.evaluate(&p, PageKind::InvestorStatements, &memberships(&[5])),
            VisibilityScope::Combined {
                investor_id: 42,
                organizations: OrganizationFilter::All,
            }
        );
    }

    #[test]
    fn admin_on_investor_page_is_unrestricted_or_investor_plus_all() {
        let policy = AccessPolicy::default();

        let plain_admin = principal(Some("admin"), Some(7));
        assert_eq!(
            policy.evaluate(&plain_admin, PageKind::InvestorStatements, &memberships(&[1])),
            VisibilityScope::Unrestricted
        );

        let investor_admin = principal(Some("admin"), Some(12));
        assert_eq!(
            policy.evaluate(&investor_admin, PageKind::InvestorStatements, &memberships(&[])),
            VisibilityScope::Unrestricted
        );
        assert_eq!(
            policy.evaluate(&investor_admin, PageKind::InvestorStatements, &memberships(&[4])),
            VisibilityScope::Combined {
                investor_id: 42,
                organizations: OrganizationFilter::All,
            }
        );
    }

    #[test]
    fn evaluation_is_deterministic() {
        let policy = AccessPolicy::default();
        let p = principal(None, Some(12));
        let snapshot = memberships(&[2, 1]);
        let first = policy.evaluate(&p, PageKind::InvestorStatements, &snapshot);
        let second = policy.evaluate(&p, PageKind::InvestorStatements, &snapshot);
        assert_eq!(first, second);
    }

    #[test]
    fn scope_mode_parses_known_values() {
        assert_eq!(
            OrganizationScopeMode::parse("member-orgs"),
            Ok(OrganizationScopeMode::MemberOrgs)
        );
        assert_eq!(
            OrganizationScopeMode::parse(" all-orgs "),
            Ok(OrganizationScopeMode::AllOrgs)
        );
        let err = OrganizationScopeMode::parse("everything").unwrap_err();
        assert!(err.to_string().contains("everything"));
    }
}
