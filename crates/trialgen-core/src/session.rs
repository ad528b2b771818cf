use crate::canonical_json_digest;
use crate::config::SessionConfig;
use crate::format::block_to_string;
use crate::structure::{ConditionCode, ExperimentStructure};
use crate::trial::Trial;
use anyhow::{Context, Result};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Forward-only source of one block's trials for the execution loop. Each trial
/// is handed out once.
#[derive(Debug, Clone)]
pub struct TrialIterator {
    label: String,
    practice: bool,
    trials: VecDeque<Trial>,
}

impl TrialIterator {
    pub fn new(label: impl Into<String>, practice: bool, trials: Vec<Trial>) -> Self {
        Self {
            label: label.into(),
            practice,
            trials: trials.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn practice(&self) -> bool {
        self.practice
    }

    pub fn remaining(&self) -> usize {
        self.trials.len()
    }

    pub fn peek(&self) -> Option<&Trial> {
        self.trials.front()
    }

    fn to_json(&self) -> Value {
        json!({
            "label": self.label,
            "practice": self.practice,
            "trials": self.trials,
        })
    }
}

impl Iterator for TrialIterator {
    type Item = Trial;

    fn next(&mut self) -> Option<Trial> {
        self.trials.pop_front()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.trials.len(), Some(self.trials.len()))
    }
}

impl ExactSizeIterator for TrialIterator {}

#[derive(Debug, Clone)]
pub struct GeneratedSession {
    condition: ConditionCode,
    seed: Option<u64>,
    blocks: Vec<TrialIterator>,
    block_strs: Vec<String>,
}

impl GeneratedSession {
    pub fn condition(&self) -> ConditionCode {
        self.condition
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn blocks(&self) -> &[TrialIterator] {
        &self.blocks
    }

    pub fn into_blocks(self) -> Vec<TrialIterator> {
        self.blocks
    }

    pub fn labels(&self) -> Vec<&str> {
        self.blocks.iter().map(TrialIterator::label).collect()
    }

    pub fn blocks_per_experiment(&self) -> usize {
        self.blocks.len()
    }

    pub fn total_trials(&self) -> usize {
        self.blocks.iter().map(TrialIterator::remaining).sum()
    }

    pub fn practice_blocks(&self) -> usize {
        self.blocks.iter().filter(|b| b.practice()).count()
    }

    /// Human-readable structure dump, one table per block.
    pub fn dump(&self) -> String {
        self.block_strs.join("\n")
    }

    pub fn to_json(&self) -> Value {
        json!({
            "schema_version": "trial_session_v1",
            "condition": self.condition.to_string(),
            "seed": self.seed,
            "blocks": self.blocks.iter().map(TrialIterator::to_json).collect::<Vec<_>>(),
        })
    }

    pub fn digest(&self) -> String {
        canonical_json_digest(&self.to_json())
    }

    pub fn write_dump(&self, path: &Path) -> Result<()> {
        atomic_write_bytes(path, self.dump().as_bytes())
            .with_context(|| format!("failed to write trial dump {}", path.display()))?;
        tracing::info!(
            path = %path.display(),
            blocks = self.blocks.len(),
            "wrote trial dump"
        );
        Ok(())
    }

    pub fn write_trials_json(&self, path: &Path) -> Result<()> {
        let mut payload = self.to_json();
        payload["digest"] = Value::String(self.digest());
        payload["generated_at"] = Value::String(Utc::now().to_rfc3339());
        let bytes = serde_json::to_vec_pretty(&payload)?;
        atomic_write_bytes(path, &bytes)
            .with_context(|| format!("failed to write trials {}", path.display()))
    }
}

/// Seeded generator for a session. Without a configured seed one is drawn from
/// entropy and returned so the session can be reproduced.
pub fn session_rng(seed: Option<u64>) -> (StdRng, u64) {
    let seed = seed.unwrap_or_else(|| rand::thread_rng().gen());
    (StdRng::seed_from_u64(seed), seed)
}

/// Generates a session with the configured seed, or a fresh one, recording the
/// seed actually used.
pub fn generate_seeded_session(
    structure: &ExperimentStructure,
    config: &SessionConfig,
) -> Result<GeneratedSession> {
    let (mut rng, seed) = session_rng(config.random_seed);
    let mut session = generate_session(structure, config, &mut rng)?;
    session.seed = Some(seed);
    Ok(session)
}

/// Expands a structure into per-block trial iterators. Practice blocks are
/// dropped when disabled, and the per-block cap is applied to the already
/// shuffled trials.
pub fn generate_session<R>(
    structure: &ExperimentStructure,
    config: &SessionConfig,
    rng: &mut R,
) -> Result<GeneratedSession>
where
    R: Rng + ?Sized,
{
    let mut blocks = Vec::with_capacity(structure.len());
    let mut block_strs = Vec::with_capacity(structure.len());
    for (index, block) in structure.blocks().iter().enumerate() {
        if block.practice() && !config.run_practice_blocks {
            continue;
        }
        let mut trials = block
            .get_trials(rng, config.full_shuffle)
            .with_context(|| format!("failed to generate block {}", index + 1))?;
        if let Some(max) = config.max_trials_per_block {
            if trials.len() > max {
                tracing::warn!(
                    block = index + 1,
                    generated = trials.len(),
                    max,
                    "truncating block to max_trials_per_block"
                );
                trials.truncate(max);
            }
        }
        block_strs.push(block_to_string(block, &trials, blocks.len() + 1));
        blocks.push(TrialIterator::new(block.label(), block.practice(), trials));
    }
    let session = GeneratedSession {
        condition: structure.condition(),
        seed: config.random_seed,
        blocks,
        block_strs,
    };
    tracing::info!(
        condition = %session.condition,
        blocks = session.blocks_per_experiment(),
        trials = session.total_trials(),
        "generated session"
    );
    Ok(session)
}

fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    // Persist the rename itself; not every platform can open a directory.
    if let Ok(dir) = fs::File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}
