use portal_contracts::{Identity, Principal};

use crate::PrincipalDirectory;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Unauthenticated,
    Resolved(Principal),
}

/// Builds the request principal from the contact and profile rows.
///
/// Lookup failures are logged and treated as missing rows; a principal with
/// nothing resolved is still returned and the policy denies it.
pub async fn resolve(
    directory: &dyn PrincipalDirectory,
    identity: Option<&Identity>,
) -> Resolution {
    let Some(identity) = identity else {
        return Resolution::Unauthenticated;
    };
    let identity_id = identity.as_str();

    let contact = match directory.contact_by_identity(identity_id).await {
        Ok(contact) => contact,
        Err(err) => {
            tracing::warn!(
                identity_id,
                query = "contact_by_identity",
                error = %err,
                "contact lookup failed; treating as absent"
            );
            None
        }
    };

    let profile = match directory.profile_by_identity(identity_id).await {
        Ok(profile) => profile,
        Err(err) => {
            tracing::warn!(
                identity_id,
                query = "profile_by_identity",
                error = %err,
                "profile lookup failed; treating as absent"
            );
            None
        }
    };

    Resolution::Resolved(Principal::new(identity.clone(), profile, contact))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryDirectory, Query};
    use portal_contracts::{ContactRecord, Role};

    fn identity(id: &str) -> Identity {
        Identity::new(id).expect("identity")
    }

    #[tokio::test]
    async fn absent_identity_skips_lookups() {
        let dir = MemoryDirectory::new();
        assert_eq!(resolve(&dir, None).await, Resolution::Unauthenticated);
        assert!(dir.calls().is_empty());
    }

    #[tokio::test]
    async fn resolves_role_and_contact() {
        let dir = MemoryDirectory::new()
            .with_contact("u1", 31, Some(12))
            .with_profile("u1", Some("admin"));

        let Resolution::Resolved(principal) = resolve(&dir, Some(&identity("u1"))).await else {
            panic!("expected resolved principal");
        };
        assert_eq!(principal.role, Some(Role::Admin));
        assert_eq!(
            principal.contact,
            Some(ContactRecord {
                id: 31,
                contact_types_id: Some(12),
            })
        );
        assert_eq!(dir.calls(), vec![Query::Contact, Query::Profile]);
    }

    #[tokio::test]
    async fn missing_rows_and_null_role_resolve_to_empty_principal() {
        let dir = MemoryDirectory::new().with_profile("u1", None);
        let Resolution::Resolved(principal) = resolve(&dir, Some(&identity("u1"))).await else {
            panic!("expected resolved principal");
        };
        assert_eq!(principal.role, None);
        assert_eq!(principal.contact, None);
    }

    #[tokio::test]
    async fn lookup_errors_fold_to_absent() {
        let dir = MemoryDirectory::new()
            .with_contact("u1", 31, Some(12))
            .with_contact("u1", 32, Some(12))
            .with_profile("u1", Some("admin"))
            .failing(Query::Profile);

        let Resolution::Resolved(principal) = resolve(&dir, Some(&identity("u1"))).await else {
            panic!("expected resolved principal");
        };
        assert_eq!(principal.contact, None, "ambiguous contact is dropped");
        assert_eq!(principal.role, None, "failed profile lookup is dropped");
    }
}
