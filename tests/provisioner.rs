mod common;

use sqlarcade::sandbox::{namespace_for_session, Provisioner};
use std::sync::Arc;

#[tokio::test]
async fn ensure_twice_returns_same_namespace_without_reseeding() -> anyhow::Result<()> {
    let (_dir, pool) = common::scratch_pool()?;
    let provisioner = Provisioner::new();

    let first = provisioner.ensure_sandbox(&pool, "abc-123").await?;
    assert_eq!(first, "sandbox_abc123");
    assert_eq!(pool.store().count_rows(&first, "EMPLOYEES")?, 6);

    let second = provisioner.ensure_sandbox(&pool, "abc-123").await?;
    assert_eq!(first, second);
    assert_eq!(pool.store().count_rows(&second, "EMPLOYEES")?, 6);
    Ok(())
}

#[tokio::test]
async fn a_fresh_provisioner_still_detects_an_existing_namespace() -> anyhow::Result<()> {
    let (_dir, pool) = common::scratch_pool()?;

    let first = Provisioner::new().ensure_sandbox(&pool, "abc-123").await?;
    // New provisioner instance, same store: must not seed again.
    let second = Provisioner::new().ensure_sandbox(&pool, "abc-123").await?;

    assert_eq!(first, second);
    assert_eq!(pool.store().count_rows(&first, "EMPLOYEES")?, 6);
    assert_eq!(pool.store().count_rows(&first, "WORKS_ON")?, 5);
    Ok(())
}

#[tokio::test]
async fn concurrent_first_requests_seed_exactly_once() -> anyhow::Result<()> {
    let (_dir, pool) = common::scratch_pool()?;
    let provisioner = Arc::new(Provisioner::new());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pool = pool.clone();
        let provisioner = provisioner.clone();
        handles.push(tokio::spawn(async move {
            provisioner.ensure_sandbox(&pool, "racing-session").await
        }));
    }

    let mut namespaces = Vec::new();
    for handle in handles {
        namespaces.push(handle.await??);
    }

    assert!(namespaces.iter().all(|ns| ns == &namespaces[0]));
    assert_eq!(pool.store().count_rows(&namespaces[0], "EMPLOYEES")?, 6);
    assert_eq!(pool.store().count_rows(&namespaces[0], "DEPARTMENT")?, 3);
    Ok(())
}

#[tokio::test]
async fn sessions_get_isolated_namespaces() -> anyhow::Result<()> {
    let (_dir, pool) = common::scratch_pool()?;
    let provisioner = Provisioner::new();

    let a = provisioner.ensure_sandbox(&pool, "alice").await?;
    let b = provisioner.ensure_sandbox(&pool, "bob").await?;

    assert_ne!(a, b);
    assert_eq!(pool.store().count_rows(&a, "EMPLOYEES")?, 6);
    assert_eq!(pool.store().count_rows(&b, "EMPLOYEES")?, 6);
    Ok(())
}

#[test]
fn namespace_derivation_matches_session_identity() {
    assert_eq!(namespace_for_session("alice"), "sandbox_alice");
    assert_eq!(
        namespace_for_session("d4f1-77b0-9c2e"),
        "sandbox_d4f177b09c2e"
    );
    // Identical input, identical namespace.
    assert_eq!(
        namespace_for_session("d4f1-77b0-9c2e"),
        namespace_for_session("d4f1-77b0-9c2e")
    );
}
