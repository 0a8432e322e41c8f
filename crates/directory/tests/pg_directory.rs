use std::time::Duration;

use portal_contracts::{ContactRecord, Identity, PageKind, PageOutcome, VisibilityScope};
use portal_directory::{DirectoryError, PgDirectory, PrincipalDirectory, authorize_page};
use portal_policy::AccessPolicy;

fn test_db_url() -> Option<String> {
    std::env::var("PORTAL_TEST_DB_URL")
        .ok()
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

async fn seeded_schema(db_url: &str) -> sqlx::PgPool {
    let schema = format!("portal_test_{}", ulid::Ulid::new()).to_lowercase();

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(1)
        .connect(db_url)
        .await
        .expect("DB connect should succeed");

    sqlx::query(&format!("CREATE SCHEMA {}", schema))
        .execute(&pool)
        .await
        .expect("create schema should succeed");

    sqlx::query(&format!("SET search_path TO {}", schema))
        .execute(&pool)
        .await
        .expect("set search_path should succeed");

    for statement in [
        "CREATE TABLE contacts (id BIGINT PRIMARY KEY, contact_types_id BIGINT NULL, user_id TEXT NULL)",
        "CREATE TABLE profiles (id TEXT PRIMARY KEY, role TEXT NULL)",
        "CREATE TABLE organization_members (user_id TEXT NOT NULL, org_id BIGINT NOT NULL)",
        "INSERT INTO contacts (id, contact_types_id, user_id) VALUES (1, 12, 'investor'), (2, 7, 'vendor'), (3, 12, 'dupe'), (4, 12, 'dupe'), (5, 12, 'member')",
        "INSERT INTO profiles (id, role) VALUES ('admin', 'admin'), ('investor', NULL), ('vendor', 'standard')",
        "INSERT INTO organization_members (user_id, org_id) VALUES ('member', 20), ('member', 10)",
    ] {
        sqlx::query(statement)
            .execute(&pool)
            .await
            .expect("schema setup should succeed");
    }

    pool
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pg_directory_projects_rows_and_flags_ambiguity() {
    let Some(db_url) = test_db_url() else {
        eprintln!("skipping directory test; set PORTAL_TEST_DB_URL to enable");
        return;
    };

    let pool = seeded_schema(&db_url).await;
    let directory = PgDirectory::from_pool(pool, Duration::from_secs(2));

    directory.ping().await.expect("ping should succeed");

    assert_eq!(
        directory
            .contact_by_identity("investor")
            .await
            .expect("contact lookup should succeed"),
        Some(ContactRecord {
            id: 1,
            contact_types_id: Some(12),
        })
    );
    assert_eq!(
        directory
            .contact_by_identity("nobody")
            .await
            .expect("contact lookup should succeed"),
        None
    );
    assert!(matches!(
        directory.contact_by_identity("dupe").await,
        Err(DirectoryError::Ambiguous { .. })
    ));

    let profile = directory
        .profile_by_identity("investor")
        .await
        .expect("profile lookup should succeed")
        .expect("profile row exists");
    assert_eq!(profile.role, None);

    let memberships = directory
        .memberships_by_identity("member")
        .await
        .expect("membership lookup should succeed");
    assert_eq!(
        memberships.iter().map(|m| m.org_id).collect::<Vec<_>>(),
        vec![10, 20]
    );

    directory.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pg_directory_drives_page_authorization() {
    let Some(db_url) = test_db_url() else {
        eprintln!("skipping directory test; set PORTAL_TEST_DB_URL to enable");
        return;
    };

    let pool = seeded_schema(&db_url).await;
    let directory = PgDirectory::from_pool(pool, Duration::from_secs(2));
    let policy = AccessPolicy::default();

    let investor = Identity::new("investor").expect("identity");
    assert_eq!(
        authorize_page(
            &directory,
            &policy,
            Some(&investor),
            PageKind::InvestorStatements
        )
        .await,
        PageOutcome::Render(VisibilityScope::ByInvestor { investor_id: 1 })
    );

    let vendor = Identity::new("vendor").expect("identity");
    assert_eq!(
        authorize_page(
            &directory,
            &policy,
            Some(&vendor),
            PageKind::InvestorStatements
        )
        .await,
        PageOutcome::RedirectDashboard
    );

    let admin = Identity::new("admin").expect("identity");
    assert_eq!(
        authorize_page(&directory, &policy, Some(&admin), PageKind::AdminStatements).await,
        PageOutcome::Render(VisibilityScope::Unrestricted)
    );

    directory.close().await;
}
