use crate::error::StructureError;
use crate::trial::Trial;
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;

/// String that marks a level as chosen at trial time by the execution loop.
pub const RANDOM_SENTINEL: &str = "random";

/// Upper bound on the combination space. Every generation cycle materialises
/// the whole space, so larger sets are rejected when the set is built.
pub const MAX_SET_LENGTH: usize = 1_000_000;

/// A concrete value a factor can take on a trial.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LevelValue {
    Text(String),
    Flag(bool),
    Int(i64),
    /// Resolved by whoever consumes the trial, never by this crate.
    Random,
}

impl LevelValue {
    pub fn is_random(&self) -> bool {
        matches!(self, Self::Random)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Flag(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for LevelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Flag(b) => write!(f, "{}", b),
            Self::Int(n) => write!(f, "{}", n),
            Self::Random => f.write_str(RANDOM_SENTINEL),
        }
    }
}

impl From<&str> for LevelValue {
    fn from(value: &str) -> Self {
        if value == RANDOM_SENTINEL {
            Self::Random
        } else {
            Self::Text(value.to_string())
        }
    }
}

impl From<String> for LevelValue {
    fn from(value: String) -> Self {
        if value == RANDOM_SENTINEL {
            Self::Random
        } else {
            Self::Text(value)
        }
    }
}

impl From<bool> for LevelValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

impl From<i64> for LevelValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for LevelValue {
    fn from(value: i32) -> Self {
        Self::Int(value as i64)
    }
}

impl Serialize for LevelValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Text(s) => serializer.serialize_str(s),
            Self::Flag(b) => serializer.serialize_bool(*b),
            Self::Int(n) => serializer.serialize_i64(*n),
            Self::Random => serializer.serialize_str(RANDOM_SENTINEL),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawValue {
    Flag(bool),
    Int(i64),
    Text(String),
}

impl From<RawValue> for LevelValue {
    fn from(raw: RawValue) -> Self {
        match raw {
            RawValue::Flag(b) => Self::Flag(b),
            RawValue::Int(n) => Self::Int(n),
            RawValue::Text(s) => s.into(),
        }
    }
}

impl<'de> Deserialize<'de> for LevelValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        RawValue::deserialize(deserializer).map(Into::into)
    }
}

/// One declared level of a factor. A weight of `n` makes the value appear `n`
/// times in the combination space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Level {
    pub value: LevelValue,
    pub weight: u32,
}

impl Level {
    pub fn new(value: impl Into<LevelValue>) -> Self {
        Self::weighted(value, 1)
    }

    pub fn weighted(value: impl Into<LevelValue>, weight: u32) -> Self {
        Self {
            value: value.into(),
            weight,
        }
    }
}

impl From<LevelValue> for Level {
    fn from(value: LevelValue) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Level {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Level {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<bool> for Level {
    fn from(value: bool) -> Self {
        Self::new(value)
    }
}

impl From<i64> for Level {
    fn from(value: i64) -> Self {
        Self::new(value)
    }
}

impl<V: Into<LevelValue>> From<(V, u32)> for Level {
    fn from((value, weight): (V, u32)) -> Self {
        Self::weighted(value, weight)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLevel {
    Pair(RawValue, i64),
    Weighted { value: RawValue, weight: i64 },
    Bare(RawValue),
}

impl<'de> Deserialize<'de> for Level {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (value, weight) = match RawLevel::deserialize(deserializer)? {
            RawLevel::Pair(value, weight) | RawLevel::Weighted { value, weight } => {
                (value, weight)
            }
            RawLevel::Bare(value) => (value, 1),
        };
        let weight = u32::try_from(weight).map_err(|_| {
            <D::Error as de::Error>::custom(format!(
                "level weight must be a positive integer, got {}",
                weight
            ))
        })?;
        Ok(Level::weighted(LevelValue::from(value), weight))
    }
}

/// A named independent variable and its declared levels, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Factor {
    name: String,
    levels: Vec<Level>,
}

impl Factor {
    pub fn new<I, L>(name: impl Into<String>, levels: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<Level>,
    {
        Self {
            name: name.into(),
            levels: levels.into_iter().map(Into::into).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn total_weight(&self) -> u64 {
        self.levels.iter().map(|l| l.weight as u64).sum()
    }

    /// Level-major expansion: every repeat of the first level, then the second, ...
    pub fn expanded(&self) -> Vec<&LevelValue> {
        self.levels
            .iter()
            .flat_map(|l| std::iter::repeat(&l.value).take(l.weight as usize))
            .collect()
    }

    fn validate(&self) -> Result<(), StructureError> {
        if self.name.trim().is_empty() {
            return Err(StructureError::configuration(
                &self.name,
                "factor name cannot be empty",
            ));
        }
        if self.levels.is_empty() {
            return Err(StructureError::configuration(
                &self.name,
                "level list is empty",
            ));
        }
        if let Some(level) = self.levels.iter().find(|l| l.weight == 0) {
            return Err(StructureError::configuration(
                &self.name,
                format!("level '{}' has non-positive weight", level.value),
            ));
        }
        Ok(())
    }
}

/// An ordered, immutable set of factors and the combination space they span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactorSet {
    factors: Vec<Factor>,
    set_length: usize,
}

impl FactorSet {
    pub fn new(factors: Vec<Factor>) -> Result<Self, StructureError> {
        let mut seen = BTreeSet::new();
        for factor in &factors {
            factor.validate()?;
            if !seen.insert(factor.name.as_str()) {
                return Err(StructureError::configuration(
                    &factor.name,
                    "duplicate factor name",
                ));
            }
        }
        let set_length = compute_set_length(&factors)?;
        Ok(Self {
            factors,
            set_length,
        })
    }

    pub fn names(&self) -> Vec<&str> {
        self.factors.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn factors(&self) -> &[Factor] {
        &self.factors
    }

    pub fn get(&self, name: &str) -> Option<&Factor> {
        self.factors.iter().find(|f| f.name == name)
    }

    /// Number of combinations counting weighted repeats. Zero for a set with no
    /// factors.
    pub fn set_length(&self) -> usize {
        self.set_length
    }

    /// Returns a new set with the named factors' levels replaced. Only existing
    /// factors can be replaced; the receiver is left untouched.
    pub fn with_overrides<I>(&self, patch: I) -> Result<FactorSet, StructureError>
    where
        I: IntoIterator<Item = Factor>,
    {
        let mut factors = self.factors.clone();
        for replacement in patch {
            let slot = factors
                .iter_mut()
                .find(|f| f.name == replacement.name)
                .ok_or_else(|| StructureError::UnknownFactor {
                    factor: replacement.name.clone(),
                })?;
            *slot = replacement;
        }
        FactorSet::new(factors)
    }

    /// Full expanded Cartesian product in declaration order, last factor varying
    /// fastest.
    pub fn combinations(&self) -> Vec<Trial> {
        if self.factors.is_empty() {
            return Vec::new();
        }
        let names = self.names();
        let expanded: Vec<Vec<&LevelValue>> = self.factors.iter().map(Factor::expanded).collect();
        let mut out = Vec::with_capacity(self.set_length);
        let mut idx = vec![0usize; expanded.len()];
        loop {
            out.push(Trial::from_pairs(
                names
                    .iter()
                    .zip(expanded.iter().zip(idx.iter()))
                    .map(|(name, (levels, &i))| (name.to_string(), levels[i].clone())),
            ));
            let mut pos = expanded.len();
            loop {
                if pos == 0 {
                    return out;
                }
                pos -= 1;
                idx[pos] += 1;
                if idx[pos] < expanded[pos].len() {
                    break;
                }
                idx[pos] = 0;
            }
        }
    }
}

fn compute_set_length(factors: &[Factor]) -> Result<usize, StructureError> {
    if factors.is_empty() {
        return Ok(0);
    }
    let mut total: u64 = 1;
    for factor in factors {
        total = total
            .checked_mul(factor.total_weight())
            .filter(|&n| n <= MAX_SET_LENGTH as u64)
            .ok_or_else(|| {
                StructureError::configuration(
                    &factor.name,
                    format!(
                        "combination space is too large (limit {} combinations)",
                        MAX_SET_LENGTH
                    ),
                )
            })?;
    }
    Ok(total as usize)
}

struct FactorSetVisitor;

impl<'de> Visitor<'de> for FactorSetVisitor {
    type Value = FactorSet;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a mapping of factor name to a list of levels")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<FactorSet, A::Error> {
        let mut factors = Vec::new();
        while let Some((name, levels)) = map.next_entry::<String, Vec<Level>>()? {
            factors.push(Factor { name, levels });
        }
        FactorSet::new(factors).map_err(de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for FactorSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(FactorSetVisitor)
    }
}
