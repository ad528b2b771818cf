use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructureError {
    #[error("invalid factor '{factor}': {reason}")]
    Configuration { factor: String, reason: String },
    #[error("override references unknown factor: {factor}")]
    UnknownFactor { factor: String },
    #[error("block '{label}' has an empty combination space")]
    DegenerateFactorSet { label: String },
    #[error("invalid condition code '{code}': {reason}")]
    InvalidCondition { code: String, reason: String },
}

impl StructureError {
    pub(crate) fn configuration(factor: &str, reason: impl Into<String>) -> Self {
        Self::Configuration {
            factor: factor.to_string(),
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::UnknownFactor { .. } => "unknown_factor",
            Self::DegenerateFactorSet { .. } => "degenerate_factor_set",
            Self::InvalidCondition { .. } => "invalid_condition",
        }
    }
}
