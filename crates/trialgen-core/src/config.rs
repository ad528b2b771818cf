use crate::structure::ConditionCode;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONDITION: &str = "NI-A";
pub const DEFAULT_DUMP_PATH: &str = "trial_dump.txt";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub condition: Option<String>,
    pub conditions: Vec<String>,
    pub default_condition: String,
    pub run_practice_blocks: bool,
    pub max_trials_per_block: Option<usize>,
    pub full_shuffle: bool,
    pub random_seed: Option<u64>,
    pub dump_path: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            condition: None,
            conditions: ConditionCode::all().iter().map(|c| c.to_string()).collect(),
            default_condition: DEFAULT_CONDITION.to_string(),
            run_practice_blocks: true,
            max_trials_per_block: None,
            full_shuffle: false,
            random_seed: None,
            dump_path: PathBuf::from(DEFAULT_DUMP_PATH),
        }
    }
}

impl SessionConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read session config {}", path.display()))?;
        let config = Self::from_yaml(&raw)
            .with_context(|| format!("invalid session config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded session config");
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: SessionConfig = if raw.trim().is_empty() {
            SessionConfig::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.conditions.is_empty() {
            problems.push("conditions: at least one condition code is required".to_string());
        }
        for code in &self.conditions {
            if let Err(e) = code.parse::<ConditionCode>() {
                problems.push(format!("conditions: {}", e));
            }
        }
        match self.default_condition.parse::<ConditionCode>() {
            Err(e) => problems.push(format!("default_condition: {}", e)),
            Ok(default) if !self.is_enabled(default) => problems.push(format!(
                "default_condition: '{}' is not listed in conditions",
                self.default_condition
            )),
            Ok(_) => {}
        }
        if let Some(code) = &self.condition {
            if let Err(e) = code.parse::<ConditionCode>() {
                problems.push(format!("condition: {}", e));
            }
        }
        if self.max_trials_per_block == Some(0) {
            problems.push("max_trials_per_block: must be greater than 0 when set".to_string());
        }
        if self.dump_path.as_os_str().is_empty() {
            problems.push("dump_path: cannot be empty".to_string());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(
                "session config has invalid fields:\n{}",
                problems
                    .iter()
                    .map(|p| format!("  - {}", p))
                    .collect::<Vec<_>>()
                    .join("\n")
            ))
        }
    }

    /// Command-line override first, then the configured condition, then the
    /// default. The result must be one of `conditions`.
    pub fn resolve_condition(&self, cli_override: Option<&str>) -> Result<ConditionCode> {
        let code = cli_override
            .or(self.condition.as_deref())
            .unwrap_or(&self.default_condition);
        let parsed: ConditionCode = code.parse()?;
        if !self.is_enabled(parsed) {
            return Err(anyhow!(
                "condition '{}' is not enabled (available: {})",
                parsed,
                self.conditions.join(", ")
            ));
        }
        Ok(parsed)
    }

    /// Codes are compared parsed, so surrounding whitespace on either side
    /// does not matter.
    fn is_enabled(&self, condition: ConditionCode) -> bool {
        self.conditions
            .iter()
            .any(|c| c.parse::<ConditionCode>().map_or(false, |c| c == condition))
    }

    pub fn template() -> &'static str {
        "\
# Session settings for trialgen
condition: null                # null = use default_condition
conditions: [I-A, I-B, NI-A, NI-B]
default_condition: NI-A
run_practice_blocks: true
max_trials_per_block: null     # cap applied after shuffling
full_shuffle: false
random_seed: null              # set for a reproducible trial order
dump_path: trial_dump.txt
"
    }
}
