use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{FixedOffset, TimeDelta};

use crate::model::JobKind;
use crate::scheduler::JobSchedule;

/// Payment deadline used by the expiration job in test mode.
pub const TEST_MODE_PAYMENT_WINDOW: TimeDelta = TimeDelta::minutes(2);

/// Timeouts and secrets the engine consults on every transition.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// How long a guest has to pay after creating (or after a rejected proof).
    pub payment_window: TimeDelta,
    /// How long a booking may sit in WAITING_CONFIRMATION before auto-confirmation.
    pub confirmation_timeout: TimeDelta,
    /// Delay after checkout before a PROCESSING booking is completed.
    pub completion_grace: TimeDelta,
    /// Delay after check-in before an unfinished booking is canceled.
    pub overdue_grace: TimeDelta,
    /// Expire unpaid bookings after `TEST_MODE_PAYMENT_WINDOW` of inactivity.
    pub test_mode: bool,
    pub gateway_provider: String,
    pub gateway_server_key: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            payment_window: TimeDelta::hours(1),
            confirmation_timeout: TimeDelta::hours(24),
            completion_grace: TimeDelta::hours(24),
            overdue_grace: TimeDelta::hours(24),
            test_mode: false,
            gateway_provider: "midtrans".into(),
            gateway_server_key: None,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Invalid { name: &'static str, value: String },
    Schedule { kind: JobKind, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { name, value } => {
                write!(f, "invalid value for {name}: {value:?}")
            }
            ConfigError::Schedule { kind, reason } => {
                write!(f, "invalid schedule for {kind} job: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub engine: EngineSettings,
    pub timezone: FixedOffset,
    pub jobs: Vec<JobSchedule>,
}

/// Seconds-first cron expressions (`sec min hour dom mon dow`).
const DEFAULT_CRON: [(JobKind, &str, &str); 4] = [
    (JobKind::Expiration, "INNKEEP_CRON_EXPIRATION", "0 * * * * *"),
    (JobKind::AutoConfirmation, "INNKEEP_CRON_AUTO_CONFIRM", "0 */10 * * * *"),
    (JobKind::Completion, "INNKEEP_CRON_COMPLETION", "0 0 * * * *"),
    (JobKind::OverdueCancellation, "INNKEEP_CRON_OVERDUE", "0 30 * * * *"),
];

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_dir = lookup("INNKEEP_DATA_DIR").unwrap_or_else(|| "./data".into());
        let metrics_port = parse_opt::<u16>(&lookup, "INNKEEP_METRICS_PORT")?;
        let compact_threshold =
            parse_opt::<u64>(&lookup, "INNKEEP_COMPACT_THRESHOLD")?.unwrap_or(1000);

        let defaults = EngineSettings::default();
        let engine = EngineSettings {
            payment_window: parse_secs(&lookup, "INNKEEP_PAYMENT_WINDOW_SECS")?
                .unwrap_or(defaults.payment_window),
            confirmation_timeout: parse_secs(&lookup, "INNKEEP_CONFIRMATION_TIMEOUT_SECS")?
                .unwrap_or(defaults.confirmation_timeout),
            completion_grace: parse_secs(&lookup, "INNKEEP_COMPLETION_GRACE_SECS")?
                .unwrap_or(defaults.completion_grace),
            overdue_grace: parse_secs(&lookup, "INNKEEP_OVERDUE_GRACE_SECS")?
                .unwrap_or(defaults.overdue_grace),
            test_mode: parse_opt::<bool>(&lookup, "INNKEEP_TEST_MODE")?.unwrap_or(false),
            gateway_provider: lookup("INNKEEP_GATEWAY_PROVIDER")
                .unwrap_or(defaults.gateway_provider),
            gateway_server_key: lookup("INNKEEP_GATEWAY_SERVER_KEY").filter(|k| !k.is_empty()),
        };

        let timezone = match lookup("INNKEEP_SCHEDULER_TZ") {
            Some(raw) => FixedOffset::from_str(raw.trim()).map_err(|_| ConfigError::Invalid {
                name: "INNKEEP_SCHEDULER_TZ",
                value: raw,
            })?,
            None => FixedOffset::east_opt(0).ok_or(ConfigError::Invalid {
                name: "INNKEEP_SCHEDULER_TZ",
                value: "+00:00".into(),
            })?,
        };

        let mut jobs = Vec::with_capacity(DEFAULT_CRON.len());
        for (kind, var, default) in DEFAULT_CRON {
            let expression = lookup(var).unwrap_or_else(|| default.to_string());
            let job = JobSchedule::parse(kind, &expression, timezone).map_err(|e| {
                ConfigError::Schedule {
                    kind,
                    reason: e.to_string(),
                }
            })?;
            jobs.push(job);
        }

        Ok(Self {
            data_dir: PathBuf::from(data_dir),
            metrics_port,
            compact_threshold,
            engine,
            timezone,
            jobs,
        })
    }
}

fn parse_opt<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
    }
}

fn parse_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<TimeDelta>, ConfigError> {
    let Some(secs) = parse_opt::<u32>(lookup, name)? else {
        return Ok(None);
    };
    Ok(Some(TimeDelta::seconds(i64::from(secs))))
}
