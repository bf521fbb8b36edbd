//! Rollout strategy — how fast outdated replicas are replaced.

/// Configuration for rolling updates.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RollingConfig {
    /// Maximum number of replicas being replaced at once.
    pub batch_size: u32,
}

impl RollingConfig {
    /// A zero batch size would never make progress and is raised to one.
    pub fn new(batch_size: u32) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }
}

impl Default for RollingConfig {
    fn default() -> Self {
        Self { batch_size: 1 }
    }
}

/// Number of batches needed to replace `replicas` replicas.
pub fn batch_count(replicas: u32, batch_size: u32) -> u32 {
    if batch_size == 0 {
        return replicas;
    }
    replicas.div_ceil(batch_size)
}
