//! Engine tuning knobs

/// Configuration shared by the orchestrator and its run loops
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Save attempts per checkpoint before the run is parked as
    /// degraded
    pub checkpoint_retries: u32,

    /// Delay between checkpoint save attempts
    pub checkpoint_retry_delay_ms: u64,

    /// How long a cancelled stage gets to wind down before the run is
    /// marked cancelled anyway
    pub cancel_grace_ms: u64,

    /// Stage timeout applied when the stage declares none
    pub default_timeout_secs: u64,

    /// Capacity of the broadcast event channel
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            checkpoint_retries: 3,
            checkpoint_retry_delay_ms: 100,
            cancel_grace_ms: 2_000,
            default_timeout_secs: 300,
            event_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = EngineConfig::default();
        assert!(cfg.checkpoint_retries >= 1);
        assert!(cfg.event_capacity > 0);
    }
}
