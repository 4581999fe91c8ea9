use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::limits::MAX_PENDING_HOLD_TTL_SECS;
use crate::policy::{CreationPolicy, TieredRefund};

/// Process configuration, read from `ROOMLEDGER_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// Appends since the last compaction that trigger a new one.
    pub compact_threshold: u64,
    pub creation_policy: CreationPolicy,
    pub pending_hold_ttl: Duration,
    pub refund: TieredRefund,
    /// How often the reaper looks for expired holds and no-shows.
    pub sweep_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            creation_policy: CreationPolicy::default(),
            pending_hold_ttl: Duration::from_secs(15 * 60),
            refund: TieredRefund::default(),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid value for {var}: {value:?}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults, unparsable ones are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let data_dir = lookup("ROOMLEDGER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let metrics_port = parsed(&lookup, "ROOMLEDGER_METRICS_PORT")?;
        let compact_threshold =
            parsed(&lookup, "ROOMLEDGER_COMPACT_THRESHOLD")?.unwrap_or(defaults.compact_threshold);
        let creation_policy =
            parsed(&lookup, "ROOMLEDGER_CREATION_POLICY")?.unwrap_or(defaults.creation_policy);
        let pending_hold_ttl = parsed(&lookup, "ROOMLEDGER_PENDING_HOLD_TTL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.pending_hold_ttl);
        let sweep_interval = parsed(&lookup, "ROOMLEDGER_SWEEP_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.sweep_interval);

        let refund = TieredRefund {
            full_refund_days: parsed(&lookup, "ROOMLEDGER_FULL_REFUND_DAYS")?
                .unwrap_or(defaults.refund.full_refund_days),
            partial_refund_days: parsed(&lookup, "ROOMLEDGER_PARTIAL_REFUND_DAYS")?
                .unwrap_or(defaults.refund.partial_refund_days),
            partial_percent: parsed(&lookup, "ROOMLEDGER_PARTIAL_REFUND_PERCENT")?
                .unwrap_or(defaults.refund.partial_percent),
        };
        if pending_hold_ttl.as_secs() > MAX_PENDING_HOLD_TTL_SECS {
            return Err(ConfigError {
                var: "ROOMLEDGER_PENDING_HOLD_TTL_SECS",
                value: pending_hold_ttl.as_secs().to_string(),
            });
        }
        if refund.partial_percent > 100 {
            return Err(ConfigError {
                var: "ROOMLEDGER_PARTIAL_REFUND_PERCENT",
                value: refund.partial_percent.to_string(),
            });
        }

        Ok(Self {
            data_dir,
            metrics_port,
            compact_threshold,
            creation_policy,
            pending_hold_ttl,
            refund,
            sweep_interval,
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("ledger.wal")
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError { var, value }),
    }
}
