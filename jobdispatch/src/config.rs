// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

/// Settings of a [`crate::JobDispatcher`]. There is no global instance: build one and pass it in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatcherConfig {
    /// Number of worker threads. Fixed for the lifetime of the dispatcher.
    pub workers: usize,
    /// Prefix of the worker thread names, followed by the worker index.
    pub thread_name: String,
    /// Budget used by `run_idle_work()`.
    pub idle_budget: IdleBudget,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            thread_name: "job-worker".to_string(),
            idle_budget: IdleBudget::unlimited(),
        }
    }
}

impl DispatcherConfig {
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, DispatchError> {
        let config: DispatcherConfig =
            serde_json::from_str(json).map_err(|e| DispatchError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.workers == 0 {
            return Err(DispatchError::InvalidConfig(
                "at least one worker is required".into(),
            ));
        }
        if self.thread_name.trim().is_empty() {
            return Err(DispatchError::InvalidConfig(
                "thread name must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Limits how much idle work a single drain call performs. `None` means no limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdleBudget {
    pub max_jobs: Option<usize>,
    #[serde(rename = "max_time_ms", with = "opt_millis")]
    pub max_time: Option<Duration>,
}

impl IdleBudget {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn jobs(max_jobs: usize) -> Self {
        Self {
            max_jobs: Some(max_jobs),
            max_time: None,
        }
    }

    pub fn time(max_time: Duration) -> Self {
        Self {
            max_jobs: None,
            max_time: Some(max_time),
        }
    }

    pub(crate) fn is_exhausted(&self, ran: usize, elapsed: Duration) -> bool {
        self.max_jobs.is_some_and(|max| ran >= max)
            || self.max_time.is_some_and(|max| elapsed >= max)
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        value
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = DispatcherConfig::default();
        assert!(config.workers >= 1);
        assert!(config.validate().is_ok());
        assert_eq!(config.idle_budget, IdleBudget::unlimited());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = DispatcherConfig::with_workers(0).validate().unwrap_err();
        assert!(matches!(err, DispatchError::InvalidConfig(_)));
    }

    #[test]
    fn test_from_json_partial() {
        let json = r#"{"workers": 3, "idle_budget": {"max_jobs": 5, "max_time_ms": 8}}"#;
        let config = DispatcherConfig::from_json(json).unwrap();
        assert_eq!(config.workers, 3);
        assert_eq!(config.thread_name, "job-worker");
        assert_eq!(config.idle_budget.max_jobs, Some(5));
        assert_eq!(config.idle_budget.max_time, Some(Duration::from_millis(8)));
    }

    #[test]
    fn test_from_json_rejects_unknown_fields() {
        let err = DispatcherConfig::from_json(r#"{"wrokers": 3}"#).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_json_round_trip_keeps_millis() {
        let config = DispatcherConfig {
            workers: 2,
            thread_name: "ui-jobs".into(),
            idle_budget: IdleBudget::time(Duration::from_millis(16)),
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"max_time_ms\":16"));
        assert_eq!(DispatcherConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_budget_exhaustion() {
        assert!(!IdleBudget::unlimited().is_exhausted(1000, Duration::from_secs(60)));
        assert!(!IdleBudget::jobs(2).is_exhausted(1, Duration::ZERO));
        assert!(IdleBudget::jobs(2).is_exhausted(2, Duration::ZERO));
        let five_ms = Duration::from_millis(5);
        assert!(IdleBudget::time(five_ms).is_exhausted(0, five_ms));
    }
}
