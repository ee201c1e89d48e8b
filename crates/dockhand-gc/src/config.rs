//! Collector settings.

use std::time::Duration;

use dockhand_common::error::{ConfigError, Validator};
use dockhand_engine::ImageFilter;
use serde::Deserialize;

/// How often the collector runs, what it considers, and how old an image
/// must be before it is removed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Delay before each sweep.
    #[serde(with = "secs")]
    pub interval: Duration,
    /// Images created longer ago than this are removed.
    #[serde(with = "secs")]
    pub max_age: Duration,
    /// Listing filter; only matching images are considered.
    pub filter: ImageFilter,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            max_age: Duration::from_secs(24 * 60 * 60),
            filter: ImageFilter::new(),
        }
    }
}

impl CollectorConfig {
    /// Default settings: hourly sweeps of images older than a day, no filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the delay between sweeps.
    #[must_use]
    pub const fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the age after which images are removed.
    #[must_use]
    pub const fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Adds a listing filter entry such as `("label", "ci=true")`.
    #[must_use]
    pub fn filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter.add(key, value);
        self
    }

    /// Checks every setting.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] listing every problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut v = Validator::new();
        let _ = v.check(!self.interval.is_zero(), || "interval must be greater than zero".into());
        for (key, values) in self.filter.iter() {
            let _ = v.check(!key.is_empty(), || "filter key must not be empty".into());
            for value in values {
                let _ = v.check(!value.is_empty(), || {
                    format!("filter `{key}` has an empty value")
                });
            }
        }
        v.finish()
    }
}

/// Durations written as whole seconds.
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
