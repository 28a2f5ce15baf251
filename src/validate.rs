use crate::compare::{outcomes_match, ComparePolicy};
use crate::error::ArcadeError;
use crate::hint::{generate_hint, HintFailure, HintRequest, TextModel};
use crate::pool::SandboxPool;
use crate::sandbox::Provisioner;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const SUCCESS_FEEDBACK: &str =
    "Excellent! Your query matches the expected database output.";

/// One grading request. Lives only for the duration of a `validate` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRequest {
    pub session_id: String,
    pub candidate_query: String,
    pub reference_query: String,
    pub quest_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_context: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_correct: bool,
    pub feedback: String,
    pub result_preview: String,
}

/// The validation engine: pool, provisioner, text model and grading policy,
/// owned together for the life of the process and passed in explicitly.
pub struct Arcade {
    pool: SandboxPool,
    provisioner: Provisioner,
    model: Box<dyn TextModel>,
    policy: ComparePolicy,
}

impl Arcade {
    pub fn new(pool: SandboxPool, model: Box<dyn TextModel>, policy: ComparePolicy) -> Self {
        Self {
            pool,
            provisioner: Provisioner::new(),
            model,
            policy,
        }
    }

    pub fn pool(&self) -> &SandboxPool {
        &self.pool
    }

    /// Grade one candidate query.
    ///
    /// Provision → execute candidate (rolled back) → execute reference
    /// (rolled back) → compare → either confirm or generate a hint. Engine
    /// errors from either query become a negative result carrying the error
    /// text; provisioning and hint-service failures propagate. No retries.
    pub async fn validate(
        &self,
        req: &ValidationRequest,
    ) -> Result<ValidationResult, ArcadeError> {
        let namespace = self
            .provisioner
            .ensure_sandbox(&self.pool, &req.session_id)
            .await?;

        // One connection for the rest of the request; released on drop.
        let mut conn = self.pool.get().await?;

        debug!(namespace, candidate = %req.candidate_query, "executing candidate");
        let candidate = {
            let mut txn = conn.begin(&namespace);
            txn.execute(&req.candidate_query)
            // txn drops here: candidate changes are rolled back.
        };
        let candidate = match candidate {
            Ok(outcome) => outcome,
            Err(e) if e.is_execution_error() => {
                return self.execution_error_result(req, e).await;
            }
            Err(e) => return Err(e),
        };

        debug!(namespace, reference = %req.reference_query, "executing reference");
        let reference = {
            let mut txn = conn.begin(&namespace);
            txn.execute(&req.reference_query)
        };
        let reference = match reference {
            Ok(outcome) => outcome,
            Err(e) if e.is_execution_error() => {
                return self.execution_error_result(req, e).await;
            }
            Err(e) => return Err(e),
        };

        let is_correct = outcomes_match(&candidate, &reference, self.policy);
        info!(namespace, is_correct, "validation compared");

        if is_correct {
            return Ok(ValidationResult {
                is_correct: true,
                feedback: SUCCESS_FEEDBACK.to_string(),
                result_preview: candidate.preview(),
            });
        }

        let hint = generate_hint(
            self.model.as_ref(),
            &HintRequest {
                user_query: req.candidate_query.clone(),
                quest_description: req.quest_description.clone(),
                schema_context: req.schema_context.clone(),
                failure: HintFailure::ResultMismatch,
            },
        )
        .await?;

        Ok(ValidationResult {
            is_correct: false,
            feedback: hint,
            result_preview: candidate.preview(),
        })
    }

    /// Negative result for a query the engine rejected: feedback leads with
    /// the raw engine error text, followed by the generated hint.
    async fn execution_error_result(
        &self,
        req: &ValidationRequest,
        err: ArcadeError,
    ) -> Result<ValidationResult, ArcadeError> {
        let message = err.to_string();
        debug!(error = %message, "query failed to execute");

        let hint = generate_hint(
            self.model.as_ref(),
            &HintRequest {
                user_query: req.candidate_query.clone(),
                quest_description: req.quest_description.clone(),
                schema_context: req.schema_context.clone(),
                failure: HintFailure::ExecutionError(message.clone()),
            },
        )
        .await?;

        let preview = serde_json::json!([{ "error": &message }]).to_string();

        Ok(ValidationResult {
            is_correct: false,
            feedback: format!("{message}. Hint: {hint}"),
            result_preview: preview,
        })
    }
}
