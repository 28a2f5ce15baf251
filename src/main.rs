use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlarcade::config::{ArcadeConfig, HintConfig, HINT_API_KEY_ENV};
use sqlarcade::hint::GeminiClient;
use sqlarcade::quests;
use sqlarcade::sandbox::{self, namespace_for_session};
use sqlarcade::{Arcade, ComparePolicy, SandboxPool, SandboxStore, ValidationRequest};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sqlarcade", about = "SQL quest validation sandbox")]
struct Cli {
    /// Directory for the sandbox store.
    #[arg(long, default_value = "data_dir")]
    data: PathBuf,

    /// Maximum concurrently checked-out connections.
    #[arg(long, default_value_t = sqlarcade::pool::DEFAULT_POOL_SIZE)]
    pool_size: usize,

    /// Base URL of the hint service.
    #[arg(long, default_value = "https://generativelanguage.googleapis.com")]
    hint_url: String,

    /// Model name passed to the hint service.
    #[arg(long, default_value = "gemini-2.0-flash")]
    hint_model: String,

    /// Grade row sets as unordered sets instead of exact serialized order.
    #[arg(long)]
    set_equality: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the built-in quests.
    Quests,
    /// Validate a candidate query for a session.
    Validate {
        /// Session identifier (namespaces are derived from it).
        #[arg(long)]
        session: String,
        /// Built-in quest id supplying the reference query and description.
        #[arg(long)]
        quest: String,
        /// The candidate SQL to grade.
        #[arg(long)]
        query: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Quests => {
            for q in quests::builtin() {
                println!("{:<24} {:<12} {:<18} {}", q.id, q.difficulty, q.category, q.title);
            }
            Ok(())
        }
        Command::Validate {
            session,
            quest,
            query,
        } => {
            let config = ArcadeConfig {
                data_dir: cli.data,
                pool_size: cli.pool_size,
                compare_policy: if cli.set_equality {
                    ComparePolicy::SetEquality
                } else {
                    ComparePolicy::OrderSensitive
                },
                hint: HintConfig {
                    endpoint: cli.hint_url,
                    model: cli.hint_model,
                    api_key: std::env::var(HINT_API_KEY_ENV)
                        .with_context(|| format!("{HINT_API_KEY_ENV} is not set"))?,
                    ..HintConfig::default()
                },
            };

            let quest = quests::find(&quest)
                .with_context(|| format!("unknown quest id: {quest}"))?;

            let store = SandboxStore::open(&config.data_dir)?;
            let pool = SandboxPool::new(store, config.pool_size);
            let model = GeminiClient::new(&config.hint)?;
            let arcade = Arcade::new(pool, Box::new(model), config.compare_policy);

            let namespace = namespace_for_session(&session);
            let schema_context =
                sandbox::live_table_context(arcade.pool(), &namespace, &quest.table_names());

            info!(quest = %quest.id, session, "validating submission");
            let result = arcade
                .validate(&ValidationRequest {
                    session_id: session,
                    candidate_query: query,
                    reference_query: quest.correct_query.clone(),
                    quest_description: quest.long_description.clone(),
                    schema_context: (!schema_context.is_empty()).then_some(schema_context),
                })
                .await?;

            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
    }
}
