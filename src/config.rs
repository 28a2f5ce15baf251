use crate::compare::ComparePolicy;
use std::path::PathBuf;

/// Process-level configuration. Built once at startup (CLI flags plus
/// environment for the secret) and passed into constructors explicitly.
#[derive(Debug, Clone)]
pub struct ArcadeConfig {
    /// Directory backing the sandbox store.
    pub data_dir: PathBuf,
    /// Upper bound on concurrently checked-out connections.
    pub pool_size: usize,
    /// Grading policy for row sets.
    pub compare_policy: ComparePolicy,
    pub hint: HintConfig,
}

#[derive(Debug, Clone)]
pub struct HintConfig {
    /// Base URL of the generateContent-compatible endpoint.
    pub endpoint: String,
    pub model: String,
    /// Read from SQLARCADE_HINT_API_KEY.
    pub api_key: String,
    pub timeout_secs: u64,
    pub max_output_tokens: u32,
}

impl Default for HintConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com".into(),
            model: "gemini-2.0-flash".into(),
            api_key: String::new(),
            timeout_secs: 20,
            max_output_tokens: 256,
        }
    }
}

pub const HINT_API_KEY_ENV: &str = "SQLARCADE_HINT_API_KEY";

impl Default for ArcadeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data_dir"),
            pool_size: crate::pool::DEFAULT_POOL_SIZE,
            compare_policy: ComparePolicy::default(),
            hint: HintConfig::default(),
        }
    }
}
