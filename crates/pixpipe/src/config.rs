use pixpipe_transform::QualityTier;

/// Default weight converting quality loss into cost units (`K`).
pub const DEFAULT_QUALITY_WEIGHT: f64 = 100.0;
/// Default cap on node expansions per search.
pub const DEFAULT_MAX_EXPANSIONS: usize = 4096;
/// Default canary bytes appended to each scratch buffer.
pub const DEFAULT_CANARY_BYTES: usize = 0;

/// Tunables for pipeline search.
///
/// # Example
/// ```rust
/// use pixpipe::prelude::*;
///
/// let config = PlannerConfig::default()
///     .quality_weight(-3.0)
///     .quality_tier(Some(QualityTier::Integer))
///     .sanitized();
/// assert_eq!(config.quality_weight, DEFAULT_QUALITY_WEIGHT);
/// assert_eq!(config.quality_tier, Some(QualityTier::Integer));
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PlannerConfig {
    /// Search key is `cost + (1 - quality) * quality_weight`.
    pub quality_weight: f64,
    /// Restrict tiered colorspace conversions to this tier.
    pub quality_tier: Option<QualityTier>,
    /// Guard against runaway searches on very large registries.
    pub max_expansions: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            quality_weight: DEFAULT_QUALITY_WEIGHT,
            quality_tier: None,
            max_expansions: DEFAULT_MAX_EXPANSIONS,
        }
    }
}

impl PlannerConfig {
    pub fn quality_weight(mut self, k: f64) -> Self {
        self.quality_weight = k;
        self
    }

    pub fn quality_tier(mut self, tier: Option<QualityTier>) -> Self {
        self.quality_tier = tier;
        self
    }

    pub fn max_expansions(mut self, max: usize) -> Self {
        self.max_expansions = max;
        self
    }

    /// Replace out-of-range values with usable ones.
    pub fn sanitized(self) -> Self {
        let quality_weight = if self.quality_weight.is_finite() && self.quality_weight >= 0.0 {
            self.quality_weight
        } else {
            DEFAULT_QUALITY_WEIGHT
        };
        Self {
            quality_weight,
            quality_tier: self.quality_tier,
            max_expansions: self.max_expansions.max(1),
        }
    }
}

/// Tunables for pipeline execution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ExecutorConfig {
    /// Guard bytes after each scratch buffer, checked by [`crate::Pipeline::scratch_intact`].
    pub canary_bytes: usize,
}

impl ExecutorConfig {
    pub fn canary_bytes(mut self, bytes: usize) -> Self {
        self.canary_bytes = bytes;
        self
    }
}

/// Aggregate planner and executor configuration.
///
/// # Example
/// ```rust
/// use pixpipe::prelude::*;
///
/// let config = PixpipeConfig::new()
///     .quality_weight(10.0)
///     .max_expansions(0)
///     .canary_bytes(16);
/// assert_eq!(config.planner().max_expansions, 1);
/// assert_eq!(config.executor().canary_bytes, 16);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PixpipeConfig {
    planner: PlannerConfig,
    executor: ExecutorConfig,
}

impl PixpipeConfig {
    /// Start building a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the quality weight `K`.
    pub fn quality_weight(mut self, k: f64) -> Self {
        self.planner.quality_weight = k;
        self
    }

    /// Pin tiered colorspace conversions.
    pub fn quality_tier(mut self, tier: QualityTier) -> Self {
        self.planner.quality_tier = Some(tier);
        self
    }

    /// Override the search expansion cap.
    pub fn max_expansions(mut self, max: usize) -> Self {
        self.planner.max_expansions = max;
        self
    }

    /// Override scratch canary length.
    pub fn canary_bytes(mut self, bytes: usize) -> Self {
        self.executor.canary_bytes = bytes;
        self
    }

    /// Sanitized planner tunables.
    pub fn planner(&self) -> PlannerConfig {
        self.planner.sanitized()
    }

    pub fn executor(&self) -> ExecutorConfig {
        self.executor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitized_rejects_non_finite_weight() {
        let config = PlannerConfig::default().quality_weight(f64::NAN).sanitized();
        assert_eq!(config.quality_weight, DEFAULT_QUALITY_WEIGHT);
        let config = PlannerConfig::default().quality_weight(0.0).sanitized();
        assert_eq!(config.quality_weight, 0.0);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn partial_json_fills_defaults() {
        let config: PixpipeConfig =
            serde_json::from_str(r#"{ "planner": { "quality_tier": "fixed_point" } }"#).unwrap();
        let planner = config.planner();
        assert_eq!(planner.quality_tier, Some(QualityTier::FixedPoint));
        assert_eq!(planner.quality_weight, DEFAULT_QUALITY_WEIGHT);
        assert_eq!(config.executor().canary_bytes, DEFAULT_CANARY_BYTES);

        let json = serde_json::to_string(&config).unwrap();
        let back: PixpipeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
