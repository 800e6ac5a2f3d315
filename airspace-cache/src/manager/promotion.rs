//! Cold-to-hot promotion policy.

use crate::config::PromotionConfig;
use crate::model::BoundingBox;

/// What the policy knows about an entry being considered for the hot tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PromotionCandidate {
    pub size_bytes: u64,
    /// Cold-tier reads so far.
    pub access_count: u64,
    /// Arrived from the remote source in this request.
    pub just_fetched: bool,
    pub bounds: Option<BoundingBox>,
}

/// Decides which entries enter the hot tier.
#[derive(Debug, Clone)]
pub struct PromotionPolicy {
    config: PromotionConfig,
}

impl PromotionPolicy {
    pub fn new(config: PromotionConfig) -> Self {
        Self { config }
    }

    /// Evaluate a candidate against current hot-tier byte usage.
    ///
    /// Large entries are refused while the hot tier is under pressure so
    /// that one big polygon cannot push out many small ones. Otherwise an
    /// entry is promoted if it was just fetched, is frequently read, or
    /// lies in the primary area.
    pub fn should_promote(
        &self,
        candidate: &PromotionCandidate,
        hot_used_bytes: u64,
        hot_max_bytes: u64,
    ) -> bool {
        let c = &self.config;
        let under_pressure =
            hot_used_bytes as f64 > hot_max_bytes as f64 * c.pressure_ratio;
        if under_pressure && candidate.size_bytes > c.large_entry_bytes {
            return false;
        }
        if candidate.just_fetched || candidate.access_count > c.access_threshold {
            return true;
        }
        match (&c.primary_area, &candidate.bounds) {
            (Some(area), Some(bounds)) => area.intersects(bounds),
            _ => false,
        }
    }

    /// Whether an entry with `access_count` reads could pass the policy,
    /// judged before its bounds are known.
    pub fn worth_inspecting(&self, access_count: u64) -> bool {
        access_count > self.config.access_threshold || self.config.primary_area.is_some()
    }
}
