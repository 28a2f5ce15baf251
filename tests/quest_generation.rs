mod common;

use async_trait::async_trait;
use sqlarcade::error::ArcadeError;
use sqlarcade::hint::TextModel;
use sqlarcade::quests::{
    Difficulty, GenerateQuestRequest, QuestGenerator, QuestTheme,
};
use std::sync::atomic::{AtomicUsize, Ordering};

struct CountingModel {
    calls: AtomicUsize,
    reply: String,
}

#[async_trait]
impl TextModel for CountingModel {
    async fn generate(&self, _prompt: &str) -> Result<String, ArcadeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}

fn request() -> GenerateQuestRequest {
    GenerateQuestRequest {
        title: "The Treasury Audit".into(),
        short_description: "Total the kingdom's payroll.".into(),
        difficulty: Difficulty::Intermediate,
        theme: QuestTheme::MedievalKingdom,
    }
}

#[tokio::test]
async fn generation_parses_fenced_json_output() -> anyhow::Result<()> {
    let model = common::ScriptedModel(
        "```json\n{\"longDescription\": \"Sum every salary in the royal ledger.\", \
         \"correctQuery\": \"SELECT SUM(Salary) FROM EMPLOYEES\"}\n```"
            .into(),
    );
    let generator = QuestGenerator::new();

    let quest = generator.generate(&model, &request()).await?;
    assert_eq!(quest.correct_query, "SELECT SUM(Salary) FROM EMPLOYEES");
    assert_eq!(quest.long_description, "Sum every salary in the royal ledger.");
    Ok(())
}

#[tokio::test]
async fn generation_result_is_cached_per_request() -> anyhow::Result<()> {
    let model = CountingModel {
        calls: AtomicUsize::new(0),
        reply: "{\"longDescription\": \"d\", \"correctQuery\": \"SELECT 1\"}".into(),
    };
    let generator = QuestGenerator::new();

    let first = generator.generate(&model, &request()).await?;
    let second = generator.generate(&model, &request()).await?;

    assert_eq!(first.correct_query, second.correct_query);
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn malformed_generation_output_is_an_error() {
    let model = common::ScriptedModel("sorry, I cannot help with that".into());
    let generator = QuestGenerator::new();

    let err = generator.generate(&model, &request()).await.unwrap_err();
    assert!(matches!(err, ArcadeError::HintService(_)));
}
