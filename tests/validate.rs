mod common;

use common::CANNED_HINT;
use sqlarcade::error::ArcadeError;
use sqlarcade::validate::{ValidationRequest, SUCCESS_FEEDBACK};
use sqlarcade::{Arcade, ComparePolicy};

fn request(session: &str, candidate: &str, reference: &str) -> ValidationRequest {
    ValidationRequest {
        session_id: session.into(),
        candidate_query: candidate.into(),
        reference_query: reference.into(),
        quest_description: "Find the high earners of the kingdom.".into(),
        schema_context: None,
    }
}

#[tokio::test]
async fn matching_select_is_graded_correct() -> anyhow::Result<()> {
    let h = common::harness()?;
    let result = h
        .arcade
        .validate(&request(
            "sess-match",
            "SELECT Fname, Lname FROM EMPLOYEES WHERE Salary > 70000",
            "SELECT Fname, Lname FROM EMPLOYEES WHERE Salary > 70000",
        ))
        .await?;

    assert!(result.is_correct);
    assert_eq!(result.feedback, SUCCESS_FEEDBACK);
    assert_eq!(
        result.result_preview,
        r#"[{"Fname":"King","Lname":"Arthur"},{"Fname":"Merlin","Lname":"Ambrosius"}]"#
    );
    // A correct answer never consults the hint service.
    assert!(h.prompts.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn row_order_matters_under_default_policy() -> anyhow::Result<()> {
    let h = common::harness()?;
    let result = h
        .arcade
        .validate(&request(
            "sess-order",
            "SELECT * FROM EMPLOYEES ORDER BY Salary ASC",
            "SELECT * FROM EMPLOYEES ORDER BY Salary DESC",
        ))
        .await?;

    assert!(!result.is_correct);
    assert_eq!(result.feedback, CANNED_HINT);
    Ok(())
}

#[tokio::test]
async fn row_order_is_forgiven_under_set_equality() -> anyhow::Result<()> {
    let h = common::harness_with_policy(ComparePolicy::SetEquality)?;
    let result = h
        .arcade
        .validate(&request(
            "sess-set",
            "SELECT * FROM EMPLOYEES ORDER BY Salary ASC",
            "SELECT * FROM EMPLOYEES ORDER BY Salary DESC",
        ))
        .await?;

    assert!(result.is_correct);
    Ok(())
}

#[tokio::test]
async fn syntax_error_feedback_leads_with_engine_text() -> anyhow::Result<()> {
    let h = common::harness()?;
    let result = h
        .arcade
        .validate(&request(
            "sess-typo",
            "SELCT * FROM EMPLOYEES",
            "SELECT * FROM EMPLOYEES",
        ))
        .await?;

    assert!(!result.is_correct);
    assert!(result.feedback.starts_with("Parse error:"));
    assert!(result.feedback.contains("SELCT"));
    assert!(result.feedback.ends_with(&format!("Hint: {CANNED_HINT}")));
    assert!(result.result_preview.contains("error"));
    Ok(())
}

#[tokio::test]
async fn unknown_table_is_an_execution_error_not_a_crash() -> anyhow::Result<()> {
    let h = common::harness()?;
    let result = h
        .arcade
        .validate(&request(
            "sess-missing",
            "SELECT * FROM CASTLES",
            "SELECT * FROM EMPLOYEES",
        ))
        .await?;

    assert!(!result.is_correct);
    assert!(result.feedback.contains("CASTLES"));
    Ok(())
}

#[tokio::test]
async fn bulk_update_compares_by_affected_rows_and_rolls_back() -> anyhow::Result<()> {
    let h = common::harness()?;

    let result = h
        .arcade
        .validate(&request(
            "sess-bulk",
            "UPDATE EMPLOYEES SET Salary = 0",
            "UPDATE EMPLOYEES SET Salary = 0",
        ))
        .await?;
    assert!(result.is_correct);
    assert_eq!(result.result_preview, r#"{"affectedRows":6}"#);

    // A fresh read must still see the original salaries.
    let check = h
        .arcade
        .validate(&request(
            "sess-bulk",
            "SELECT Salary FROM EMPLOYEES WHERE Ssn = '111111111'",
            "SELECT Salary FROM EMPLOYEES WHERE Ssn = '111111111'",
        ))
        .await?;
    assert!(check.is_correct);
    assert_eq!(check.result_preview, r#"[{"Salary":90000}]"#);
    Ok(())
}

#[tokio::test]
async fn mutation_versus_select_never_matches() -> anyhow::Result<()> {
    let h = common::harness()?;
    let result = h
        .arcade
        .validate(&request(
            "sess-mixed",
            "UPDATE EMPLOYEES SET Salary = 0",
            "SELECT * FROM EMPLOYEES",
        ))
        .await?;

    assert!(!result.is_correct);
    Ok(())
}

#[tokio::test]
async fn insert_rolls_back_between_validations() -> anyhow::Result<()> {
    let h = common::harness()?;

    let insert = "INSERT INTO EMPLOYEES (Fname, Lname, Ssn, Sex, Salary, Super_ssn, Dno) \
                  VALUES ('Sir', 'Galahad', '777777777', 'M', 55000, '222222222', 1)";
    let result = h
        .arcade
        .validate(&request("sess-insert", insert, insert))
        .await?;
    assert!(result.is_correct);

    let count = h
        .arcade
        .validate(&request(
            "sess-insert",
            "SELECT COUNT(*) as total_staff FROM EMPLOYEES",
            "SELECT COUNT(*) as total_staff FROM EMPLOYEES",
        ))
        .await?;
    assert_eq!(count.result_preview, r#"[{"total_staff":6}]"#);
    Ok(())
}

#[tokio::test]
async fn hint_prompt_never_contains_the_reference_query() -> anyhow::Result<()> {
    let h = common::harness()?;
    let reference = "SELECT Fname, Lname FROM EMPLOYEES WHERE Salary > 70000";
    h.arcade
        .validate(&request(
            "sess-leak",
            "SELECT Fname FROM EMPLOYEES",
            reference,
        ))
        .await?;

    let prompts = h.prompts.lock().unwrap();
    assert!(!prompts.is_empty());
    for prompt in prompts.iter() {
        assert!(!prompt.contains(reference));
    }
    Ok(())
}

#[tokio::test]
async fn hint_service_failure_is_fatal() -> anyhow::Result<()> {
    let (_dir, pool) = common::scratch_pool()?;
    let arcade = Arcade::new(
        pool,
        Box::new(common::FailingModel),
        ComparePolicy::OrderSensitive,
    );

    let err = arcade
        .validate(&request(
            "sess-down",
            "SELECT Fname FROM EMPLOYEES",
            "SELECT Lname FROM EMPLOYEES",
        ))
        .await
        .unwrap_err();

    assert!(matches!(err, ArcadeError::HintService(_)));
    Ok(())
}

#[tokio::test]
async fn mismatch_prompt_flags_mismatch_and_embeds_candidate() -> anyhow::Result<()> {
    let h = common::harness()?;
    h.arcade
        .validate(&request(
            "sess-prompt",
            "SELECT Fname FROM EMPLOYEES",
            "SELECT Lname FROM EMPLOYEES",
        ))
        .await?;

    let prompts = h.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("results do not match"));
    assert!(prompts[0].contains("SELECT Fname FROM EMPLOYEES"));
    assert!(prompts[0].contains("Find the high earners"));
    Ok(())
}
