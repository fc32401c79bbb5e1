//! Optimizer configuration

use annotopt_core::directive::DEFAULT_PREFIX;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Preset strength of the heuristic stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizationLevel {
    /// Small budgets, every rewrite validated
    Conservative,
    /// The defaults
    Standard,
    /// Large budgets, more inline rounds
    Aggressive,
}

/// Problems with a configuration document
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Optimizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Annotation prefix (`tool: ...`)
    pub prefix: String,
    /// Largest static trip count that is fully unrolled
    pub full_unroll_limit: u64,
    /// Strip-mining factor when the directive names none
    pub default_unroll_factor: u32,
    /// Callee size (nodes) under which `speed` considers inlining
    pub speed_inline_budget: usize,
    /// Trip count × body size under which `speed` fully unrolls
    pub speed_unroll_budget: usize,
    /// Shortest statement run `size` re-rolls into a loop
    pub collapse_min_run: usize,
    /// Bound on repeated inline stages
    pub max_inline_rounds: usize,
    /// Ask the compiler oracle before inlining
    pub consult_oracle: bool,
    /// Validate the fragment after every rewrite
    pub validate_each_pass: bool,
    /// Transform functions in parallel
    pub parallel: bool,
    /// Worker threads (0 = one per core)
    pub num_threads: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::for_level(OptimizationLevel::Standard)
    }
}

impl OptimizerConfig {
    /// Create config for optimization level
    pub fn for_level(level: OptimizationLevel) -> Self {
        let standard = Self {
            prefix: DEFAULT_PREFIX.to_string(),
            full_unroll_limit: 16,
            default_unroll_factor: 4,
            speed_inline_budget: 48,
            speed_unroll_budget: 384,
            collapse_min_run: 3,
            max_inline_rounds: 4,
            consult_oracle: true,
            validate_each_pass: true,
            parallel: true,
            num_threads: 0,
        };
        match level {
            OptimizationLevel::Standard => standard,
            OptimizationLevel::Conservative => Self {
                full_unroll_limit: 8,
                default_unroll_factor: 2,
                speed_inline_budget: 16,
                speed_unroll_budget: 96,
                collapse_min_run: 4,
                max_inline_rounds: 1,
                ..standard
            },
            OptimizationLevel::Aggressive => Self {
                full_unroll_limit: 64,
                default_unroll_factor: 8,
                speed_inline_budget: 160,
                speed_unroll_budget: 2048,
                collapse_min_run: 3,
                max_inline_rounds: 8,
                validate_each_pass: false,
                ..standard
            },
        }
    }

    pub fn conservative() -> Self {
        Self::for_level(OptimizationLevel::Conservative)
    }

    pub fn aggressive() -> Self {
        Self::for_level(OptimizationLevel::Aggressive)
    }

    /// Load a configuration document; missing fields keep their defaults
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prefix.trim().is_empty() || self.prefix.contains(char::is_whitespace) {
            return Err(ConfigError::Invalid {
                field: "prefix",
                reason: format!("{:?} is not a single word", self.prefix),
            });
        }
        if self.default_unroll_factor < 2 {
            return Err(ConfigError::Invalid {
                field: "default_unroll_factor",
                reason: format!("must be at least 2, got {}", self.default_unroll_factor),
            });
        }
        if self.collapse_min_run < 2 {
            return Err(ConfigError::Invalid {
                field: "collapse_min_run",
                reason: format!("must be at least 2, got {}", self.collapse_min_run),
            });
        }
        Ok(())
    }
}

impl From<ConfigError> for annotopt_core::Error {
    fn from(error: ConfigError) -> Self {
        annotopt_core::Error::Other(anyhow::Error::new(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OptimizerConfig::default();
        assert_eq!(config.prefix, "tool");
        assert_eq!(config.full_unroll_limit, 16);
        assert_eq!(config.default_unroll_factor, 4);
        assert_eq!(config.speed_inline_budget, 48);
        assert_eq!(config.speed_unroll_budget, 384);
        assert_eq!(config.collapse_min_run, 3);
        assert_eq!(config.max_inline_rounds, 4);
        assert!(config.consult_oracle && config.validate_each_pass && config.parallel);
        assert_eq!(config.num_threads, 0);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            OptimizerConfig::from_json(r#"{ "prefix": "opt", "default_unroll_factor": 3 }"#)
                .unwrap();
        assert_eq!(config.prefix, "opt");
        assert_eq!(config.default_unroll_factor, 3);
        assert_eq!(config.full_unroll_limit, 16);

        let back = OptimizerConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            OptimizerConfig::from_json(r#"{ "default_unroll_factor": 1 }"#),
            Err(ConfigError::Invalid {
                field: "default_unroll_factor",
                ..
            })
        ));
        assert!(matches!(
            OptimizerConfig::from_json("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_presets() {
        let conservative = OptimizerConfig::conservative();
        let aggressive = OptimizerConfig::aggressive();
        assert!(conservative.speed_inline_budget < aggressive.speed_inline_budget);
        assert!(conservative.full_unroll_limit < aggressive.full_unroll_limit);
        assert!(conservative.validate().is_ok() && aggressive.validate().is_ok());
    }
}
