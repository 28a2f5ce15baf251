mod common;

use sqlarcade::error::ArcadeError;
use sqlarcade::model::{Cell, Outcome};

fn affected(outcome: Outcome) -> u64 {
    match outcome {
        Outcome::Affected(n) => n,
        other => panic!("expected an affected-rows outcome, got {other:?}"),
    }
}

#[tokio::test]
async fn insert_is_visible_in_txn_and_gone_after_drop() -> anyhow::Result<()> {
    let (_dir, pool) = common::scratch_pool()?;
    let ns = common::seeded_namespace(&pool, "m-insert").await?;

    let mut conn = pool.get().await?;
    {
        let mut txn = conn.begin(&ns);
        let n = affected(txn.execute(
            "INSERT INTO EMPLOYEES (Fname, Lname, Ssn, Sex, Salary, Super_ssn, Dno) \
             VALUES ('Sir', 'Galahad', '777777777', 'M', 55000, '222222222', 1)",
        )?);
        assert_eq!(n, 1);

        match txn.execute("SELECT COUNT(*) FROM EMPLOYEES")? {
            Outcome::Rows(rs) => assert_eq!(rs.rows[0][0], Cell::Int(7)),
            other => panic!("expected rows, got {other:?}"),
        }
    }

    // Rolled back: the persisted table is untouched.
    assert_eq!(pool.store().count_rows(&ns, "EMPLOYEES")?, 6);
    Ok(())
}

#[tokio::test]
async fn update_counts_only_changed_rows() -> anyhow::Result<()> {
    let (_dir, pool) = common::scratch_pool()?;
    let ns = common::seeded_namespace(&pool, "m-update").await?;

    let mut conn = pool.get().await?;
    let mut txn = conn.begin(&ns);

    let n = affected(txn.execute(
        "UPDATE EMPLOYEES SET Salary = 85000 WHERE Ssn = '555555555'",
    )?);
    assert_eq!(n, 1);

    // Second identical update changes nothing, so MySQL reports zero.
    let n = affected(txn.execute(
        "UPDATE EMPLOYEES SET Salary = 85000 WHERE Ssn = '555555555'",
    )?);
    assert_eq!(n, 0);

    match txn.execute("SELECT Salary FROM EMPLOYEES WHERE Ssn = '555555555'")? {
        Outcome::Rows(rs) => assert_eq!(rs.rows, vec![vec![Cell::Int(85000)]]),
        other => panic!("expected rows, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn bulk_update_without_where_touches_every_row() -> anyhow::Result<()> {
    let (_dir, pool) = common::scratch_pool()?;
    let ns = common::seeded_namespace(&pool, "m-bulk").await?;

    let mut conn = pool.get().await?;
    {
        let mut txn = conn.begin(&ns);
        assert_eq!(affected(txn.execute("UPDATE EMPLOYEES SET Salary = 0")?), 6);
    }

    // Every salary survives the rollback.
    let mut txn = conn.begin(&ns);
    match txn.execute("SELECT SUM(Salary) FROM EMPLOYEES")? {
        Outcome::Rows(rs) => assert_eq!(rs.rows[0][0], Cell::Int(387000)),
        other => panic!("expected rows, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn delete_with_and_without_where() -> anyhow::Result<()> {
    let (_dir, pool) = common::scratch_pool()?;
    let ns = common::seeded_namespace(&pool, "m-delete").await?;

    let mut conn = pool.get().await?;
    let mut txn = conn.begin(&ns);

    assert_eq!(
        affected(txn.execute("DELETE FROM EMPLOYEES WHERE Dno = 5")?),
        2
    );
    assert_eq!(affected(txn.execute("DELETE FROM EMPLOYEES")?), 4);

    match txn.execute("SELECT COUNT(*) FROM EMPLOYEES")? {
        Outcome::Rows(rs) => assert_eq!(rs.rows[0][0], Cell::Int(0)),
        other => panic!("expected rows, got {other:?}"),
    }
    drop(txn);

    assert_eq!(pool.store().count_rows(&ns, "EMPLOYEES")?, 6);
    Ok(())
}

#[tokio::test]
async fn updates_can_reference_current_values() -> anyhow::Result<()> {
    let (_dir, pool) = common::scratch_pool()?;
    let ns = common::seeded_namespace(&pool, "m-selfref").await?;

    let mut conn = pool.get().await?;
    let mut txn = conn.begin(&ns);

    let n = affected(txn.execute("UPDATE EMPLOYEES SET Salary = Salary + 1000")?);
    assert_eq!(n, 6);

    match txn.execute("SELECT Salary FROM EMPLOYEES WHERE Ssn = '111111111'")? {
        Outcome::Rows(rs) => assert_eq!(rs.rows, vec![vec![Cell::Int(91000)]]),
        other => panic!("expected rows, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn not_null_columns_reject_null_inserts() -> anyhow::Result<()> {
    let (_dir, pool) = common::scratch_pool()?;
    let ns = common::seeded_namespace(&pool, "m-notnull").await?;

    let mut conn = pool.get().await?;
    let mut txn = conn.begin(&ns);

    let err = txn
        .execute(
            "INSERT INTO EMPLOYEES (Fname, Lname, Ssn) VALUES ('Sir', 'Bors', NULL)",
        )
        .unwrap_err();
    assert!(matches!(err, ArcadeError::Invalid(_)));
    assert!(err.to_string().contains("Ssn"));
    Ok(())
}

#[tokio::test]
async fn unknown_insert_column_is_rejected() -> anyhow::Result<()> {
    let (_dir, pool) = common::scratch_pool()?;
    let ns = common::seeded_namespace(&pool, "m-badcol").await?;

    let mut conn = pool.get().await?;
    let mut txn = conn.begin(&ns);

    let err = txn
        .execute("INSERT INTO EMPLOYEES (Nickname) VALUES ('Lancey')")
        .unwrap_err();
    assert!(matches!(err, ArcadeError::NotFound(_)));
    Ok(())
}

#[tokio::test]
async fn transactions_are_isolated_from_each_other() -> anyhow::Result<()> {
    let (_dir, pool) = common::scratch_pool()?;
    let ns = common::seeded_namespace(&pool, "m-isolation").await?;

    let mut writer = pool.get().await?;
    let mut reader = pool.get().await?;

    let mut write_txn = writer.begin(&ns);
    affected(write_txn.execute("DELETE FROM EMPLOYEES")?);

    // The concurrent transaction still sees the seed data.
    let mut read_txn = reader.begin(&ns);
    match read_txn.execute("SELECT COUNT(*) FROM EMPLOYEES")? {
        Outcome::Rows(rs) => assert_eq!(rs.rows[0][0], Cell::Int(6)),
        other => panic!("expected rows, got {other:?}"),
    }
    Ok(())
}
