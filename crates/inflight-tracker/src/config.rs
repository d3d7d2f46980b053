use std::time::Duration;

/// Configuration for a call registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How long a finished, unretained record survives before the sweep
    /// removes it (default: 1000 ms).
    pub sweep_delay: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            sweep_delay: Duration::from_millis(1000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sweep_delay() {
        assert_eq!(RegistryConfig::default().sweep_delay, Duration::from_millis(1000));
    }
}
