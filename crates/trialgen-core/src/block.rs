use crate::error::StructureError;
use crate::factors::{Factor, FactorSet};
use crate::trial::Trial;
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;

/// A group of trials drawn from one factor set, plus the metadata the execution
/// loop needs to present it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    factors: Arc<FactorSet>,
    label: String,
    practice: bool,
    trials: Option<usize>,
}

impl Block {
    pub fn new(factors: impl Into<Arc<FactorSet>>) -> Self {
        Self {
            factors: factors.into(),
            label: String::new(),
            practice: false,
            trials: None,
        }
    }

    pub fn from_factors(factors: Vec<Factor>) -> Result<Self, StructureError> {
        Ok(Self::new(FactorSet::new(factors)?))
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_practice(mut self, practice: bool) -> Self {
        self.practice = practice;
        self
    }

    pub fn with_trials(mut self, trials: usize) -> Self {
        self.trials = Some(trials);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn practice(&self) -> bool {
        self.practice
    }

    pub fn trialcount(&self) -> usize {
        self.trials.unwrap_or_else(|| self.factors.set_length())
    }

    pub fn factors(&self) -> Vec<&str> {
        self.factors.names()
    }

    pub fn factor_set(&self) -> &FactorSet {
        &self.factors
    }

    /// Builds `trialcount` trials by appending independently shuffled copies of
    /// the full combination space, cutting the last copy short. With
    /// `full_shuffle` the assembled sequence is shuffled again as a whole.
    pub fn get_trials<R>(
        &self,
        rng: &mut R,
        full_shuffle: bool,
    ) -> Result<Vec<Trial>, StructureError>
    where
        R: Rng + ?Sized,
    {
        if self.factors.set_length() == 0 {
            return Err(StructureError::DegenerateFactorSet {
                label: self.label.clone(),
            });
        }
        let target = self.trialcount();
        let mut trials = Vec::with_capacity(target);
        let mut cycles = 0usize;
        while trials.len() < target {
            let mut cycle = self.factors.combinations();
            cycle.shuffle(rng);
            cycle.truncate(target - trials.len());
            trials.extend(cycle);
            cycles += 1;
        }
        if full_shuffle {
            trials.shuffle(rng);
        }
        tracing::debug!(
            label = %self.label,
            practice = self.practice,
            trials = trials.len(),
            cycles,
            full_shuffle,
            "generated block trials"
        );
        Ok(trials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factors::{Level, LevelValue};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn target_side() -> FactorSet {
        FactorSet::new(vec![
            Factor::new("target", ["T", "F"]),
            Factor::new("side", ["L", "R"]),
        ])
        .expect("valid factor set")
    }

    fn sorted(mut trials: Vec<Trial>) -> Vec<Trial> {
        trials.sort();
        trials
    }

    #[test]
    fn default_trialcount_is_a_permutation_of_the_space() {
        let set = target_side();
        let block = Block::new(set.clone());
        assert_eq!(block.trialcount(), 4);
        let mut rng = StdRng::seed_from_u64(7);
        let trials = block.get_trials(&mut rng, false).expect("trials");
        assert_eq!(sorted(trials), sorted(set.combinations()));
    }

    #[test]
    fn returns_exactly_the_requested_count() {
        let mut rng = StdRng::seed_from_u64(11);
        for n in [0usize, 1, 3, 4, 5, 9, 17] {
            let block = Block::new(target_side()).with_trials(n);
            let trials = block.get_trials(&mut rng, n % 2 == 0).expect("trials");
            assert_eq!(trials.len(), n, "wrong length for n={}", n);
        }
    }

    #[test]
    fn short_block_has_no_repeats() {
        let mut rng = StdRng::seed_from_u64(3);
        let block = Block::new(target_side()).with_trials(3);
        let mut trials = block.get_trials(&mut rng, false).expect("trials");
        trials.sort();
        trials.dedup();
        assert_eq!(trials.len(), 3);
    }

    #[test]
    fn each_cycle_covers_the_full_space() {
        let set = target_side();
        let mut rng = StdRng::seed_from_u64(99);
        let block = Block::new(set.clone()).with_trials(12);
        let trials = block.get_trials(&mut rng, false).expect("trials");
        for chunk in trials.chunks(set.set_length()) {
            assert_eq!(sorted(chunk.to_vec()), sorted(set.combinations()));
        }
    }

    #[test]
    fn full_shuffle_keeps_the_multiset() {
        let set = target_side();
        let mut rng = StdRng::seed_from_u64(5);
        let block = Block::new(set.clone()).with_trials(8);
        let trials = block.get_trials(&mut rng, true).expect("trials");
        let mut expected = set.combinations();
        expected.extend(set.combinations());
        assert_eq!(sorted(trials), sorted(expected));
    }

    #[test]
    fn full_shuffle_mixes_across_cycles() {
        let set = target_side();
        let block = Block::new(set.clone()).with_trials(8);
        let space = sorted(set.combinations());
        let mixed = (0..20u64).any(|seed| {
            let trials = block
                .get_trials(&mut StdRng::seed_from_u64(seed), true)
                .expect("trials");
            trials
                .chunks(set.set_length())
                .any(|chunk| sorted(chunk.to_vec()) != space)
        });
        assert!(mixed, "full shuffle never crossed a cycle boundary");

        for seed in 0..20u64 {
            let trials = block
                .get_trials(&mut StdRng::seed_from_u64(seed), false)
                .expect("trials");
            for chunk in trials.chunks(set.set_length()) {
                assert_eq!(sorted(chunk.to_vec()), space, "seed {}", seed);
            }
        }
    }

    #[test]
    fn same_seed_gives_same_sequence() {
        let block = Block::new(target_side()).with_trials(10);
        let a = block
            .get_trials(&mut StdRng::seed_from_u64(42), true)
            .expect("trials");
        let b = block
            .get_trials(&mut StdRng::seed_from_u64(42), true)
            .expect("trials");
        assert_eq!(a, b);
    }

    #[test]
    fn weighted_levels_converge_to_their_share() {
        let set = FactorSet::new(vec![Factor::new(
            "cue_validity",
            [Level::new(true), Level::weighted(false, 3)],
        )])
        .expect("valid");
        assert_eq!(set.set_length(), 4);
        let block = Block::new(set).with_trials(4001);
        let mut rng = StdRng::seed_from_u64(2024);
        let trials = block.get_trials(&mut rng, false).expect("trials");
        let invalid = trials
            .iter()
            .filter(|t| t.get("cue_validity") == Some(&LevelValue::Flag(false)))
            .count();
        let share = invalid as f64 / trials.len() as f64;
        assert!((share - 0.75).abs() < 0.01, "unexpected share: {}", share);
    }

    #[test]
    fn empty_factor_set_is_degenerate() {
        let block = Block::from_factors(Vec::new())
            .expect("empty set is constructible")
            .with_label("broken")
            .with_trials(5);
        let err = block
            .get_trials(&mut StdRng::seed_from_u64(1), false)
            .expect_err("must not loop forever");
        assert_eq!(
            err,
            StructureError::DegenerateFactorSet {
                label: "broken".to_string()
            }
        );
    }

    #[test]
    fn raw_factors_with_zero_weight_fail_eagerly() {
        let err = Block::from_factors(vec![Factor::new("cue", [Level::weighted(true, 0)])])
            .expect_err("zero weight");
        assert!(matches!(err, StructureError::Configuration { .. }));
    }

    #[test]
    fn factors_forward_names() {
        let block = Block::new(target_side()).with_label("acc").with_practice(true);
        assert_eq!(block.factors(), vec!["target", "side"]);
        assert_eq!(block.label(), "acc");
        assert!(block.practice());
    }
}
