use crate::error::ArcadeError;
use crate::pool::SandboxPool;
use crate::sql::split_statements;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::{debug, info};

/// Schema + seed data applied to every fresh namespace.
pub const INIT_SCRIPT: &str = include_str!("init.sql");

const NAMESPACE_PREFIX: &str = "sandbox_";
const NAMESPACE_MAX_LEN: usize = 50;

fn ident_filter() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_]").expect("static regex"))
}

/// Derive the namespace for a session identifier: prefix, strip everything
/// outside `[A-Za-z0-9_]`, clamp the identifier part. Deterministic, so
/// repeated calls with the same session land in the same namespace.
pub fn namespace_for_session(session_id: &str) -> String {
    let cleaned = ident_filter().replace_all(session_id, "");
    let mut tail = cleaned.into_owned();
    tail.truncate(NAMESPACE_MAX_LEN);
    format!("{NAMESPACE_PREFIX}{tail}")
}

/// Guards seed application so a provisioning race cannot hand out a
/// half-seeded namespace. The conditional create in the store decides the
/// winner across processes; this mutex covers concurrent tasks in this one.
#[derive(Default)]
pub struct Provisioner {
    seeding: Mutex<HashSet<String>>,
}

impl Provisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure the namespace for `session_id` exists and is seeded, exactly
    /// once. Losing a creation race is success: the loser observes the
    /// existing namespace and skips the seed script.
    pub async fn ensure_sandbox(
        &self,
        pool: &SandboxPool,
        session_id: &str,
    ) -> Result<String, ArcadeError> {
        let namespace = namespace_for_session(session_id);

        // Decide a role under the lock so existence is never observed while
        // a seeder is still mid-script.
        let _seed_guard = loop {
            {
                let mut seeding = self.seeding.lock();
                if !seeding.contains(&namespace) {
                    if pool.store().namespace_exists(&namespace)? {
                        debug!(namespace, "namespace already exists");
                        return Ok(namespace);
                    }
                    seeding.insert(namespace.clone());
                    break SeedGuard {
                        provisioner: self,
                        namespace: namespace.clone(),
                    };
                }
            }
            // Another task is seeding this namespace; let it finish.
            tokio::task::yield_now().await;
        };

        let created = pool
            .store()
            .create_namespace_if_absent(&namespace)
            .map_err(|e| ArcadeError::Provision(e.to_string()))?;
        if !created {
            debug!(namespace, "lost creation race, skipping seed");
            return Ok(namespace);
        }

        info!(namespace, "creating sandbox namespace");
        let mut conn = pool.get().await?;
        let mut txn = conn.begin(&namespace);
        for statement in split_statements(INIT_SCRIPT) {
            txn.execute(&statement)
                .map_err(|e| ArcadeError::Provision(format!("seed script failed: {e}")))?;
        }
        txn.commit()
            .map_err(|e| ArcadeError::Provision(format!("seed commit failed: {e}")))?;
        info!(namespace, "sandbox initialized");

        Ok(namespace)
    }
}

struct SeedGuard<'a> {
    provisioner: &'a Provisioner,
    namespace: String,
}

impl Drop for SeedGuard<'_> {
    fn drop(&mut self) {
        self.provisioner.seeding.lock().remove(&self.namespace);
    }
}

/// Column name/type context for up to `max_tables` tables, formatted for
/// prompt embedding. Failures yield an empty context rather than an error so
/// a flaky catalog read cannot take down hint generation.
pub fn live_table_context(pool: &SandboxPool, namespace: &str, tables: &[&str]) -> String {
    const MAX_TABLES: usize = 3;

    let mut out = String::new();
    for table in tables.iter().take(MAX_TABLES) {
        match pool.store().get_table(namespace, table) {
            Ok(def) => {
                out.push_str(&format!("Table: {}\n", def.name));
                for col in &def.columns {
                    let ty = match col.ty {
                        crate::model::SqlType::Int => "INT",
                        crate::model::SqlType::Float => "DECIMAL",
                        crate::model::SqlType::Text => "VARCHAR",
                        crate::model::SqlType::Date => "DATE",
                    };
                    out.push_str(&format!("  {} {}\n", col.name, ty));
                }
            }
            Err(e) => {
                debug!(namespace, table, error = %e, "schema context fetch failed");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_is_deterministic_and_sanitized() {
        let a = namespace_for_session("3f9d-2c41-ab!!");
        let b = namespace_for_session("3f9d-2c41-ab!!");
        assert_eq!(a, b);
        assert_eq!(a, "sandbox_3f9d2c41ab");
    }

    #[test]
    fn namespace_is_bounded() {
        let long: String = "a".repeat(200);
        let ns = namespace_for_session(&long);
        assert_eq!(ns.len(), "sandbox_".len() + 50);
    }

    #[test]
    fn namespace_allows_empty_session() {
        assert_eq!(namespace_for_session("##"), "sandbox_");
    }
}
