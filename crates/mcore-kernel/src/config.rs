//! System configuration.
//!
//! Every field has a default, so a JSON document only needs the keys it
//! wants to change:
//!
//! ```json
//! { "cores": 2, "quantum_ms": 5, "wake_policy": "LeastLoaded" }
//! ```

use core::fmt;

use serde::{Deserialize, Serialize};

/// How a thread leaving the timer queue (or a new thread) picks its core
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WakePolicy {
    /// Cycle through the cores
    #[default]
    RoundRobin,
    /// Core with the fewest runnable threads (by published load)
    LeastLoaded,
    /// Uniformly random core
    Random,
}

/// Which core receives a host timer interrupt
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IrqRouting {
    /// Cycle through the cores
    #[default]
    RoundRobin,
    /// Uniformly random core
    Random,
    /// Always the given core
    Fixed(u32),
}

/// Configuration for `System::boot`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Number of simulated cores
    pub cores: u32,
    /// Time slice of a non-idle thread
    pub quantum_ms: u64,
    /// Period of the host timer driving the sleep queue (one tick)
    pub timer_period_ms: u64,
    /// Node arena size of each ICI and migration inbox
    pub ici_capacity: usize,
    /// Maximum number of live threads
    pub max_threads: usize,
    pub wake_policy: WakePolicy,
    pub irq_routing: IrqRouting,
    /// Record SysLog and TransitionLog entries
    pub audit: bool,
    /// Log level name for the host logger ("error" .. "trace")
    pub log_level: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            cores: 4,
            quantum_ms: 10,
            timer_period_ms: 1,
            ici_capacity: 1024,
            max_threads: 256,
            wake_policy: WakePolicy::RoundRobin,
            irq_routing: IrqRouting::RoundRobin,
            audit: true,
            log_level: String::from("info"),
        }
    }
}

/// Configuration errors
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// The document is not valid JSON for `SystemConfig`
    Parse(String),
    NoCores,
    ZeroQuantum,
    ZeroTimerPeriod,
    ZeroCapacity,
    /// `IrqRouting::Fixed` names a core that does not exist
    IrqCoreOutOfRange(u32),
    UnknownLogLevel(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse(msg) => write!(f, "config parse error: {}", msg),
            ConfigError::NoCores => write!(f, "at least one core is required"),
            ConfigError::ZeroQuantum => write!(f, "quantum_ms must be non-zero"),
            ConfigError::ZeroTimerPeriod => write!(f, "timer_period_ms must be non-zero"),
            ConfigError::ZeroCapacity => write!(f, "ici_capacity and max_threads must be non-zero"),
            ConfigError::IrqCoreOutOfRange(core) => {
                write!(f, "irq_routing names core {} which does not exist", core)
            }
            ConfigError::UnknownLogLevel(level) => write!(f, "unknown log level '{}'", level),
        }
    }
}

impl std::error::Error for ConfigError {}

impl SystemConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: SystemConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> String {
        // Plain data with string keys; serialization cannot fail.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Check the configuration for values the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cores == 0 {
            return Err(ConfigError::NoCores);
        }
        if self.quantum_ms == 0 {
            return Err(ConfigError::ZeroQuantum);
        }
        if self.timer_period_ms == 0 {
            return Err(ConfigError::ZeroTimerPeriod);
        }
        if self.ici_capacity == 0 || self.max_threads == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if let IrqRouting::Fixed(core) = self.irq_routing {
            if core >= self.cores {
                return Err(ConfigError::IrqCoreOutOfRange(core));
            }
        }
        self.level_filter()?;
        Ok(())
    }

    /// The configured log level as a `log` filter.
    pub fn level_filter(&self) -> Result<log::LevelFilter, ConfigError> {
        self.log_level
            .parse::<log::LevelFilter>()
            .map_err(|_| ConfigError::UnknownLogLevel(self.log_level.clone()))
    }

    /// Quantum in nanoseconds
    pub fn quantum_nanos(&self) -> u64 {
        self.quantum_ms.saturating_mul(1_000_000)
    }

    /// Number of timer ticks covering `ms` milliseconds (rounded up)
    pub fn ticks_for(&self, ms: u64) -> u64 {
        ms.div_ceil(self.timer_period_ms)
    }
}
