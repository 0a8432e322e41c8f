use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Contact classification that marks a contact as an investor.
pub const INVESTOR_CONTACT_TYPE_ID: i64 = 12;

pub const SIGN_IN_PATH: &str = "/sign-in";
pub const DASHBOARD_PATH: &str = "/dashboard";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub identity_id: String,
}

impl Identity {
    /// Returns `None` for blank ids; an empty identity never authenticates.
    pub fn new(identity_id: impl Into<String>) -> Option<Self> {
        let identity_id = identity_id.into();
        let trimmed = identity_id.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self {
            identity_id: trimmed.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        self.identity_id.as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Standard,
    Other(String),
}

impl Role {
    /// Parses a profile role column. Blank values carry no role.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "" => None,
            "admin" => Some(Role::Admin),
            "standard" => Some(Role::Standard),
            other => Some(Role::Other(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::Admin => "admin",
            Role::Standard => "standard",
            Role::Other(raw) => raw.as_str(),
        }
    }
}

/// `{id, contact_types_id}` projection of a contact row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub id: i64,
    pub contact_types_id: Option<i64>,
}

/// `{role}` projection of a profile row.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationMembership {
    pub identity_id: String,
    pub org_id: i64,
}

/// The authenticated user plus the role and classification resolved for
/// the current request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub identity: Identity,
    pub role: Option<Role>,
    pub contact: Option<ContactRecord>,
}

impl Principal {
    pub fn new(
        identity: Identity,
        profile: Option<ProfileRecord>,
        contact: Option<ContactRecord>,
    ) -> Self {
        let role = profile
            .and_then(|profile| profile.role)
            .and_then(|raw| Role::parse(&raw));
        Self {
            identity,
            role,
            contact,
        }
    }

    pub fn identity_id(&self) -> &str {
        self.identity.as_str()
    }

    pub fn contact_id(&self) -> Option<i64> {
        self.contact.map(|contact| contact.id)
    }

    pub fn contact_type_id(&self) -> Option<i64> {
        self.contact.and_then(|contact| contact.contact_types_id)
    }

    pub fn is_admin(&self) -> bool {
        matches!(self.role, Some(Role::Admin))
    }

    pub fn is_investor(&self) -> bool {
        self.contact_type_id() == Some(INVESTOR_CONTACT_TYPE_ID)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    AdminStatements,
    InvestorStatements,
}

impl PageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PageKind::AdminStatements => "admin_statements",
            PageKind::InvestorStatements => "investor_statements",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "org_ids", rename_all = "snake_case")]
pub enum OrganizationFilter {
    All,
    Only(BTreeSet<i64>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VisibilityScope {
    Denied,
    Unrestricted,
    ByInvestor {
        investor_id: i64,
    },
    ByOrganizations {
        organizations: OrganizationFilter,
    },
    Combined {
        investor_id: i64,
        organizations: OrganizationFilter,
    },
}

impl VisibilityScope {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, VisibilityScope::Denied)
    }

    /// Label used for logs and metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            VisibilityScope::Denied => "denied",
            VisibilityScope::Unrestricted => "unrestricted",
            VisibilityScope::ByInvestor { .. } => "investor",
            VisibilityScope::ByOrganizations { .. } => "organizations",
            VisibilityScope::Combined { .. } => "combined",
        }
    }

    /// Lists to render, individual statements first.
    pub fn listings(&self) -> Vec<StatementListing> {
        match self {
            VisibilityScope::Denied => Vec::new(),
            VisibilityScope::Unrestricted => vec![StatementListing::Unrestricted],
            VisibilityScope::ByInvestor { investor_id } => vec![StatementListing::Individual {
                investor_id: *investor_id,
            }],
            VisibilityScope::ByOrganizations { organizations } => {
                vec![StatementListing::Organizational {
                    filter: organizations.clone(),
                }]
            }
            VisibilityScope::Combined {
                investor_id,
                organizations,
            } => vec![
                StatementListing::Individual {
                    investor_id: *investor_id,
                },
                StatementListing::Organizational {
                    filter: organizations.clone(),
                },
            ],
        }
    }
}

/// Parameters handed to one statement list on the rendered page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatementListing {
    Individual { investor_id: i64 },
    Organizational { filter: OrganizationFilter },
    Unrestricted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    RedirectSignIn,
    RedirectDashboard,
    Render(VisibilityScope),
}

impl PageOutcome {
    pub fn from_scope(scope: VisibilityScope) -> Self {
        if scope.is_allowed() {
            PageOutcome::Render(scope)
        } else {
            PageOutcome::RedirectDashboard
        }
    }

    pub fn redirect_target(&self) -> Option<&'static str> {
        match self {
            PageOutcome::RedirectSignIn => Some(SIGN_IN_PATH),
            PageOutcome::RedirectDashboard => Some(DASHBOARD_PATH),
            PageOutcome::Render(_) => None,
        }
    }

    pub fn outcome(&self) -> &'static str {
        match self {
            PageOutcome::RedirectSignIn => "sign_in",
            PageOutcome::RedirectDashboard => "denied",
            PageOutcome::Render(scope) => scope.outcome(),
        }
    }
}
