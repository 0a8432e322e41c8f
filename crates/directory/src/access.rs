use portal_contracts::{Identity, PageKind, PageOutcome};
use portal_policy::{AccessPolicy, MembershipSnapshot};

use crate::PrincipalDirectory;
use crate::resolver::{Resolution, resolve};

/// Runs resolution, the optional membership lookup and policy evaluation for
/// one page load.
pub async fn authorize_page(
    directory: &dyn PrincipalDirectory,
    policy: &AccessPolicy,
    identity: Option<&Identity>,
    page: PageKind,
) -> PageOutcome {
    let principal = match resolve(directory, identity).await {
        Resolution::Unauthenticated => return PageOutcome::RedirectSignIn,
        Resolution::Resolved(principal) => principal,
    };

    let memberships = if policy.needs_memberships(&principal, page) {
        match directory
            .memberships_by_identity(principal.identity_id())
            .await
        {
            Ok(memberships) => MembershipSnapshot::Fetched(memberships),
            Err(err) => {
                tracing::warn!(
                    identity_id = principal.identity_id(),
                    query = "memberships_by_identity",
                    error = %err,
                    "membership lookup failed; treating as no memberships"
                );
                MembershipSnapshot::Fetched(Vec::new())
            }
        }
    } else {
        MembershipSnapshot::NotFetched
    };

    let scope = policy.evaluate(&principal, page, &memberships);
    tracing::debug!(
        identity_id = principal.identity_id(),
        page = page.as_str(),
        role = principal.role.as_ref().map(|r| r.as_str()),
        contact_type_id = principal.contact_type_id(),
        scope = scope.outcome(),
        "access evaluated"
    );

    PageOutcome::from_scope(scope)
}
