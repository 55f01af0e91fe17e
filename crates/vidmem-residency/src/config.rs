//! Configuration for the residency manager.
//!
//! # Environment Variable Overrides
//!
//! All fields can be loaded from environment variables via
//! [`ResidencyConfig::from_env()`]:
//!
//! | Field | Environment Variable | Default |
//! |-------|---------------------|---------|
//! | `node_mask` | `VIDMEM_NODE_MASK` | 0 |
//! | `max_latency` | `VIDMEM_MAX_LATENCY` | 6 |
//! | `start_objects_evicted` | `VIDMEM_START_EVICTED` | false |
//! | `synchronous_paging` | `VIDMEM_SYNCHRONOUS_PAGING` | false |
//!
//! The eviction grace-period bounds are fixed constants (see
//! [`crate::budget`]), not configuration.

use crate::error::ResidencyError;

/// Configuration for a [`ResidencyManager`](crate::ResidencyManager).
#[derive(Debug, Clone)]
pub struct ResidencyConfig {
    /// Adapter node mask passed to video-memory budget queries.
    ///
    /// Zero selects the default node on single-adapter systems.
    pub node_mask: u32,

    /// Maximum number of submissions the paging worker may lag behind.
    ///
    /// The internal work ring holds `max_latency + 1` entries; a producer
    /// that gets further ahead blocks until the worker catches up.
    pub max_latency: u32,

    /// Whether newly tracked objects start evicted.
    ///
    /// When set, `begin_tracking` immediately asks the device to evict the
    /// object; the first submission referencing it pages it back in.
    pub start_objects_evicted: bool,

    /// Run the paging pipeline inline on the submitting thread.
    ///
    /// For platforms that forbid background threads. Ordering guarantees
    /// are identical; submissions absorb the paging latency directly.
    pub synchronous_paging: bool,
}

impl Default for ResidencyConfig {
    fn default() -> Self {
        Self {
            node_mask: 0,
            max_latency: 6,
            start_objects_evicted: false,
            synchronous_paging: false,
        }
    }
}

impl ResidencyConfig {
    /// Load configuration from environment variables.
    ///
    /// Falls back to default values for any unset variables.
    /// Invalid values are silently ignored (defaults used).
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("VIDMEM_NODE_MASK") {
            if let Ok(mask) = val.parse::<u32>() {
                config.node_mask = mask;
            }
        }

        if let Ok(val) = std::env::var("VIDMEM_MAX_LATENCY") {
            if let Ok(latency) = val.parse::<u32>() {
                config.max_latency = latency;
            }
        }

        if let Ok(val) = std::env::var("VIDMEM_START_EVICTED") {
            config.start_objects_evicted =
                matches!(val.to_lowercase().as_str(), "true" | "1" | "yes" | "on");
        }

        if let Ok(val) = std::env::var("VIDMEM_SYNCHRONOUS_PAGING") {
            config.synchronous_paging =
                matches!(val.to_lowercase().as_str(), "true" | "1" | "yes" | "on");
        }

        config
    }

    /// Capacity of the internal paging work ring.
    #[must_use]
    pub fn work_ring_capacity(&self) -> usize {
        self.max_latency as usize + 1
    }

    /// Validate configuration consistency.
    ///
    /// # Errors
    ///
    /// Returns `ResidencyError::InvalidConfig` if `max_latency` is zero.
    pub fn validate(&self) -> Result<(), ResidencyError> {
        if self.max_latency == 0 {
            return Err(ResidencyError::InvalidConfig {
                field: "max_latency".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}
