#![allow(dead_code)]

use async_trait::async_trait;
use sqlarcade::error::ArcadeError;
use sqlarcade::hint::TextModel;
use sqlarcade::sandbox::Provisioner;
use sqlarcade::{Arcade, ComparePolicy, SandboxPool, SandboxStore};
use std::sync::{Arc, Mutex};

pub const CANNED_HINT: &str = "Take another look at the clause that filters your rows.";

/// Scripted stand-in for the hint service: returns a fixed hint and records
/// every prompt it was shown.
pub struct CannedModel {
    pub prompts: Arc<Mutex<Vec<String>>>,
}

impl CannedModel {
    pub fn new() -> (Self, Arc<Mutex<Vec<String>>>) {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                prompts: prompts.clone(),
            },
            prompts,
        )
    }
}

#[async_trait]
impl TextModel for CannedModel {
    async fn generate(&self, prompt: &str) -> Result<String, ArcadeError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(CANNED_HINT.to_string())
    }
}

/// A hint service that is down.
pub struct FailingModel;

#[async_trait]
impl TextModel for FailingModel {
    async fn generate(&self, _prompt: &str) -> Result<String, ArcadeError> {
        Err(ArcadeError::HintService("service unreachable".into()))
    }
}

/// A model that replies with a fixed body, for quest-generation tests.
pub struct ScriptedModel(pub String);

#[async_trait]
impl TextModel for ScriptedModel {
    async fn generate(&self, _prompt: &str) -> Result<String, ArcadeError> {
        Ok(self.0.clone())
    }
}

pub struct Harness {
    pub arcade: Arcade,
    pub prompts: Arc<Mutex<Vec<String>>>,
    _data_dir: tempfile::TempDir,
}

pub fn harness() -> anyhow::Result<Harness> {
    harness_with_policy(ComparePolicy::OrderSensitive)
}

pub fn harness_with_policy(policy: ComparePolicy) -> anyhow::Result<Harness> {
    let data_dir = tempfile::tempdir()?;
    let store = SandboxStore::open(data_dir.path())?;
    let pool = SandboxPool::new(store, 4);
    let (model, prompts) = CannedModel::new();
    Ok(Harness {
        arcade: Arcade::new(pool, Box::new(model), policy),
        prompts,
        _data_dir: data_dir,
    })
}

/// A bare pool over a scratch store, for engine-level tests.
pub fn scratch_pool() -> anyhow::Result<(tempfile::TempDir, SandboxPool)> {
    let data_dir = tempfile::tempdir()?;
    let store = SandboxStore::open(data_dir.path())?;
    Ok((data_dir, SandboxPool::new(store, 4)))
}

/// Provision and seed a namespace for the given session.
pub async fn seeded_namespace(pool: &SandboxPool, session: &str) -> anyhow::Result<String> {
    let provisioner = Provisioner::new();
    Ok(provisioner.ensure_sandbox(pool, session).await?)
}
