//! Factorial trial and block generation for cued-attention sessions.
//!
//! A [`FactorSet`] spans a weighted combination space, a [`Block`] draws
//! shuffled trials from it, [`build_structure`] assembles the block sequence
//! for a condition code, and [`generate_session`] turns that sequence into
//! forward-only [`TrialIterator`]s plus a text dump for auditing.

pub mod block;
pub mod config;
pub mod error;
pub mod factors;
pub mod format;
pub mod session;
pub mod structure;
pub mod trial;

pub use block::Block;
pub use config::SessionConfig;
pub use error::StructureError;
pub use factors::{Factor, FactorSet, Level, LevelValue, MAX_SET_LENGTH, RANDOM_SENTINEL};
pub use format::block_to_string;
pub use session::{
    generate_seeded_session, generate_session, session_rng, GeneratedSession, TrialIterator,
};
pub use structure::{
    build_structure, BlockOrder, ConditionCode, CuePolicy, CueType, ExperimentStructure,
    InstructionType,
};
pub use trial::Trial;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// `sha256:<hex>` of the value serialized with object keys sorted.
pub fn canonical_json_digest(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonicalize(value).to_string().as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for key in keys {
                out.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
