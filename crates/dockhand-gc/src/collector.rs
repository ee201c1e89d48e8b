//! The collection loop and its single sweep.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dockhand_common::types::ImageId;
use dockhand_engine::{Engine, ImageFilter};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::CollectorConfig;
use crate::error::CollectError;

/// Outcome of one sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Images removed, in listing order.
    pub removed: Vec<ImageId>,
    /// Listing failure, or every removal that failed.
    pub error: Option<CollectError>,
}

impl SweepReport {
    /// Returns whether the sweep completed without any failure.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.error.is_none()
    }
}

/// Removes every image matching `filter` that was created more than
/// `max_age` ago.
///
/// Removal is forced and also prunes untagged parents. Failures never
/// abort the sweep; they are collected in the report. An image that is
/// already gone counts as neither removed nor failed.
pub async fn sweep(engine: &dyn Engine, max_age: Duration, filter: &ImageFilter) -> SweepReport {
    let images = match engine.list_images(filter).await {
        Ok(images) => images,
        Err(e) => {
            return SweepReport {
                removed: Vec::new(),
                error: Some(CollectError::List(e)),
            };
        }
    };

    let now = chrono::Utc::now().timestamp();
    let max_age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
    let mut removed = Vec::new();
    let mut failures = Vec::new();
    for image in images {
        if image.created.saturating_add(max_age) >= now {
            continue;
        }
        match engine.remove_image(image.id.as_str()).await {
            Ok(()) => {
                tracing::info!(id = %image.id, tags = ?image.repo_tags, "expired image removed");
                removed.push(image.id);
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!(id = %image.id, "expired image already removed");
            }
            Err(e) => failures.push((image.id, e)),
        }
    }

    SweepReport {
        removed,
        error: (!failures.is_empty()).then_some(CollectError::Sweep { failures }),
    }
}

/// A background loop removing expired images.
pub struct Collector {
    engine: Arc<dyn Engine>,
    config: CollectorConfig,
    reports: Option<UnboundedSender<SweepReport>>,
}

impl fmt::Debug for Collector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Collector {
    /// Creates a collector; nothing runs until [`Collector::start`].
    #[must_use]
    pub fn new(engine: Arc<dyn Engine>, config: CollectorConfig) -> Self {
        Self {
            engine,
            config,
            reports: None,
        }
    }

    /// Sends every sweep report to `tx`.
    #[must_use]
    pub fn with_reports(mut self, tx: UnboundedSender<SweepReport>) -> Self {
        self.reports = Some(tx);
        self
    }

    /// Launches the loop and returns immediately.
    ///
    /// The loop waits one interval, sweeps, and repeats until `cancel`
    /// fires. Cancellation is only observed between sweeps; a sweep in
    /// progress runs to completion. Sweep failures are logged and
    /// reported, never fatal.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`CollectError::Config`] if the configuration is invalid.
    pub fn start(self, cancel: CancellationToken) -> Result<JoinHandle<()>, CollectError> {
        self.config.validate()?;
        if self.config.filter.is_empty() {
            tracing::warn!("collector has no filter; every expired image is eligible");
        }
        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            max_age_secs = self.config.max_age.as_secs(),
            "collector started"
        );
        Ok(tokio::spawn(self.run(cancel)))
    }

    async fn run(self, cancel: CancellationToken) {
        let Self {
            engine,
            config,
            reports,
        } = self;
        let mut tick = 0_u64;
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(config.interval) => {}
            }
            tick += 1;
            let report = sweep(engine.as_ref(), config.max_age, &config.filter).await;
            match &report.error {
                None => tracing::debug!(tick, removed = report.removed.len(), "sweep finished"),
                Some(e) => tracing::warn!(tick, removed = report.removed.len(), error = %e, "sweep incomplete"),
            }
            if let Some(tx) = &reports {
                let _ = tx.send(report);
            }
        }
        tracing::info!(ticks = tick, "collector stopped");
    }
}
