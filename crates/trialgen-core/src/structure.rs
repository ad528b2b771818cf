use crate::block::Block;
use crate::error::StructureError;
use crate::factors::{Factor, FactorSet, Level, LevelValue};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub const TARGET_FACTOR: &str = "target";
pub const TARGET_LOC_FACTOR: &str = "target_loc";
pub const CUE_VALIDITY_FACTOR: &str = "cue_validity";

pub const TARGETS: [&str; 2] = ["T", "F"];
pub const TARGET_LOCATIONS: [&str; 4] = ["TL", "TR", "BL", "BR"];

/// How informative the spatial cue is about the target location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CueType {
    NonInformative,
    Informative,
}

impl CueType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NonInformative => "NI",
            Self::Informative => "I",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::NonInformative => "non-informative",
            Self::Informative => "informative",
        }
    }

    pub fn policy(self) -> CuePolicy {
        match self {
            // 25% valid, 6 x 32 = 192 trials per instruction
            Self::NonInformative => CuePolicy {
                cue_validity: vec![Level::new(true), Level::weighted(false, 3)],
                blocks_per_instruction: 6,
            },
            // 66% valid, 8 x 24 = 192 trials per instruction
            Self::Informative => CuePolicy {
                cue_validity: vec![Level::weighted(true, 2), Level::new(false)],
                blocks_per_instruction: 8,
            },
        }
    }
}

/// Which instruction condition runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockOrder {
    A,
    B,
}

impl BlockOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
        }
    }

    pub fn instructions(self) -> [InstructionType; 2] {
        match self {
            Self::A => [InstructionType::Speed, InstructionType::Accuracy],
            Self::B => [InstructionType::Accuracy, InstructionType::Speed],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstructionType {
    Speed,
    Accuracy,
}

impl InstructionType {
    pub fn label(self) -> &'static str {
        match self {
            Self::Speed => "rt",
            Self::Accuracy => "acc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CuePolicy {
    pub cue_validity: Vec<Level>,
    pub blocks_per_instruction: usize,
}

/// `<TYPE>-<ORDER>`, e.g. `NI-A`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConditionCode {
    pub cue: CueType,
    pub order: BlockOrder,
}

impl ConditionCode {
    pub fn all() -> [ConditionCode; 4] {
        [
            ConditionCode::new(CueType::Informative, BlockOrder::A),
            ConditionCode::new(CueType::Informative, BlockOrder::B),
            ConditionCode::new(CueType::NonInformative, BlockOrder::A),
            ConditionCode::new(CueType::NonInformative, BlockOrder::B),
        ]
    }

    pub fn new(cue: CueType, order: BlockOrder) -> Self {
        Self { cue, order }
    }
}

impl fmt::Display for ConditionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.cue.as_str(), self.order.as_str())
    }
}

impl FromStr for ConditionCode {
    type Err = StructureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| StructureError::InvalidCondition {
            code: s.to_string(),
            reason,
        };
        let (cue, order) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| invalid("expected <TYPE>-<ORDER>".to_string()))?;
        let cue = match cue {
            "NI" => CueType::NonInformative,
            "I" => CueType::Informative,
            other => return Err(invalid(format!("unknown type '{}' (expected NI or I)", other))),
        };
        let order = match order {
            "A" => BlockOrder::A,
            "B" => BlockOrder::B,
            other => return Err(invalid(format!("unknown order '{}' (expected A or B)", other))),
        };
        Ok(Self { cue, order })
    }
}

/// The ordered block sequence for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentStructure {
    condition: ConditionCode,
    blocks: Vec<Block>,
}

impl ExperimentStructure {
    pub fn condition(&self) -> ConditionCode {
        self.condition
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn labels(&self) -> Vec<&str> {
        self.blocks.iter().map(Block::label).collect()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn total_trials(&self) -> usize {
        self.blocks.iter().map(Block::trialcount).sum()
    }
}

pub fn base_factors(policy: &CuePolicy) -> Result<FactorSet, StructureError> {
    FactorSet::new(vec![
        Factor::new(TARGET_FACTOR, TARGETS),
        Factor::new(TARGET_LOC_FACTOR, TARGET_LOCATIONS),
        Factor::new(CUE_VALIDITY_FACTOR, policy.cue_validity.clone()),
    ])
}

/// For each instruction type in condition order: one practice block with the
/// target left to the execution loop and half the regular length, followed by
/// the regular blocks.
pub fn build_structure(condition: ConditionCode) -> Result<ExperimentStructure, StructureError> {
    let policy = condition.cue.policy();
    let exp_factors = Arc::new(base_factors(&policy)?);
    let practice_factors = Arc::new(
        exp_factors.with_overrides([Factor::new(TARGET_FACTOR, [LevelValue::Random])])?,
    );
    let practice_trials = exp_factors.set_length() / 2;

    let mut blocks = Vec::with_capacity(2 * (policy.blocks_per_instruction + 1));
    for instruction in condition.order.instructions() {
        blocks.push(
            Block::new(Arc::clone(&practice_factors))
                .with_label(instruction.label())
                .with_practice(true)
                .with_trials(practice_trials),
        );
        let regular = Block::new(Arc::clone(&exp_factors)).with_label(instruction.label());
        blocks.extend(std::iter::repeat(regular).take(policy.blocks_per_instruction));
    }

    tracing::info!(
        condition = %condition,
        cue = condition.cue.description(),
        blocks = blocks.len(),
        "built experiment structure"
    );
    Ok(ExperimentStructure { condition, blocks })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected_labels(first: &str, second: &str, per_instruction: usize) -> Vec<String> {
        let mut out = Vec::new();
        for label in [first, second] {
            for _ in 0..=per_instruction {
                out.push(label.to_string());
            }
        }
        out
    }

    #[test]
    fn parses_all_legal_codes() {
        let codes: Vec<String> = ConditionCode::all().iter().map(|c| c.to_string()).collect();
        assert_eq!(codes, vec!["I-A", "I-B", "NI-A", "NI-B"]);
        for code in codes {
            let parsed: ConditionCode = code.parse().expect("legal code");
            assert_eq!(parsed.to_string(), code);
        }
    }

    #[test]
    fn rejects_malformed_codes() {
        for bad in ["", "NI", "NI-C", "X-A", "ni-a", "NI-A-B"] {
            let err = bad.parse::<ConditionCode>().expect_err("should fail");
            assert!(
                matches!(err, StructureError::InvalidCondition { .. }),
                "unexpected error for {:?}: {}",
                bad,
                err
            );
        }
    }

    #[test]
    fn label_sequences_match_each_condition() {
        let cases = [
            ("NI-A", expected_labels("rt", "acc", 6)),
            ("NI-B", expected_labels("acc", "rt", 6)),
            ("I-A", expected_labels("rt", "acc", 8)),
            ("I-B", expected_labels("acc", "rt", 8)),
        ];
        for (code, expected) in cases {
            let structure = build_structure(code.parse().expect("code")).expect("structure");
            assert_eq!(structure.labels(), expected, "labels for {}", code);
        }
    }

    #[test]
    fn practice_blocks_open_each_instruction_at_half_length() {
        for condition in ConditionCode::all() {
            let structure = build_structure(condition).expect("structure");
            let per = condition.cue.policy().blocks_per_instruction;
            let regular_len = structure.blocks()[1].trialcount();
            for (i, block) in structure.blocks().iter().enumerate() {
                let is_practice = i % (per + 1) == 0;
                assert_eq!(block.practice(), is_practice, "{} block {}", condition, i);
                if is_practice {
                    assert_eq!(block.trialcount(), regular_len / 2);
                    let target = block.factor_set().get(TARGET_FACTOR).expect("target");
                    assert_eq!(target.levels(), &[Level::new(LevelValue::Random)]);
                } else {
                    assert_eq!(block.trialcount(), regular_len);
                }
            }
        }
    }

    #[test]
    fn regular_trials_per_instruction_are_constant() {
        let ni = build_structure("NI-A".parse().expect("code")).expect("structure");
        let i = build_structure("I-B".parse().expect("code")).expect("structure");
        assert_eq!(ni.blocks()[1].trialcount(), 32);
        assert_eq!(i.blocks()[1].trialcount(), 24);
        for structure in [&ni, &i] {
            let regular: usize = structure
                .blocks()
                .iter()
                .filter(|b| !b.practice())
                .map(Block::trialcount)
                .sum();
            assert_eq!(regular, 2 * 192);
        }
        assert_eq!(ni.total_trials(), 2 * 192 + 2 * 16);
        assert_eq!(i.total_trials(), 2 * 192 + 2 * 12);
    }

    #[test]
    fn cue_weighting_follows_type() {
        let ni = build_structure("NI-B".parse().expect("code")).expect("structure");
        let cue = ni.blocks()[1]
            .factor_set()
            .get(CUE_VALIDITY_FACTOR)
            .expect("cue factor");
        assert_eq!(cue.total_weight(), 4);
        assert_eq!(cue.levels()[1], Level::weighted(false, 3));
        assert_eq!(ni.condition().to_string(), "NI-B");
    }
}
