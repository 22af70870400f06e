//! Pipeline assembly
//!
//! Wires persistence, the channel, its flush timer and the crash reporter
//! together on the current tokio runtime.

use std::sync::Arc;

use anyhow::Context;
use appinsights_channel::{Channel, LifecycleEvent};
use appinsights_core::config::Config;
use appinsights_core::domain::{
    ApplicationContext, HandledException, PersistenceType, TelemetryContext, TelemetryData,
    TelemetryItem,
};
use appinsights_crash::CrashReporter;
use appinsights_persistence::Persistence;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::logging;

/// A running telemetry pipeline.
pub struct Pipeline {
    config: Config,
    persistence: Persistence,
    context: Arc<TelemetryContext>,
    channel: Arc<Channel>,
    crash_reporter: Option<Arc<CrashReporter>>,
    shutdown: CancellationToken,
    flush_timer: JoinHandle<()>,
}

impl Pipeline {
    /// Starts the pipeline. Must be called from within a tokio runtime.
    ///
    /// With crash reporting enabled a panic hook is installed and any
    /// handled exceptions staged by a previous run are promoted for sending.
    pub fn start(config: Config, application: ApplicationContext) -> anyhow::Result<Self> {
        let errors = config.validate();
        if !errors.is_empty() {
            let message = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            anyhow::bail!("Invalid configuration: {message}");
        }

        logging::init(&config.logging);

        let persistence = Persistence::spawn(&config.persistence);
        let context = Arc::new(TelemetryContext::new(
            application,
            config.instrumentation_key.clone(),
        ));
        let channel = Arc::new(Channel::new(
            Arc::new(persistence.clone()),
            Arc::clone(&context),
            config.channel.clone(),
        ));

        let shutdown = CancellationToken::new();
        let flush_timer = tokio::spawn(Arc::clone(&channel).run_flush_timer(shutdown.clone()));

        let crash_reporter = if config.crash.enabled {
            let reporter = Arc::new(CrashReporter::new(
                persistence.clone(),
                Arc::clone(&channel),
                Arc::clone(&context),
                &config.crash,
            ));
            reporter.install_panic_hook();

            let promoter = Arc::clone(&reporter);
            tokio::task::spawn_blocking(move || promoter.send_pending_fake_reports());
            Some(reporter)
        } else {
            debug!("Crash reporting disabled");
            None
        };

        info!(
            directory = %persistence.directory().display(),
            max_file_count = config.persistence.max_file_count,
            crash_reporting = config.crash.enabled,
            "Telemetry pipeline started"
        );

        Ok(Self {
            config,
            persistence,
            context,
            channel,
            crash_reporter,
            shutdown,
            flush_timer,
        })
    }

    /// Loads the configuration at `path` and starts the pipeline with it.
    pub fn start_from_file(
        path: &std::path::Path,
        application: ApplicationContext,
    ) -> anyhow::Result<Self> {
        let config = Config::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
        Self::start(config, application)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn persistence(&self) -> &Persistence {
        &self.persistence
    }

    pub fn context(&self) -> &Arc<TelemetryContext> {
        &self.context
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    pub fn crash_reporter(&self) -> Option<&Arc<CrashReporter>> {
        self.crash_reporter.as_ref()
    }

    /// Queues a telemetry item.
    pub fn track(&self, item: TelemetryItem) {
        self.channel.enqueue(item);
    }

    /// Queues a custom event.
    pub fn track_event(&self, name: impl Into<String>) {
        self.channel
            .enqueue(TelemetryItem::new(TelemetryData::event(name)));
    }

    /// Stages a handled exception as a crash report for the next launch.
    ///
    /// Returns `false` when crash reporting is disabled.
    pub fn track_handled_exception(&self, exception: &HandledException) -> bool {
        match &self.crash_reporter {
            Some(reporter) => {
                reporter.track_handled_exception(exception);
                true
            }
            None => false,
        }
    }

    /// Forwards an application lifecycle transition to the channel.
    pub fn on_lifecycle_event(&self, event: LifecycleEvent) {
        self.channel.on_lifecycle_event(event);
    }

    /// Persists everything queued and waits until the bundle is on disk.
    ///
    /// Returns `true` when there was nothing to flush.
    pub async fn flush(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        let submitted = self.channel.persist_data_item_queue_with(
            PersistenceType::Regular,
            Some(Box::new(move |saved| {
                let _ = tx.send(saved);
            })),
        );
        if !submitted {
            return true;
        }
        rx.await.unwrap_or(false)
    }

    /// Flushes the queue and stops the flush timer.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        info!("Shutting down telemetry pipeline");

        if !self.flush().await {
            warn!("Final flush was not persisted");
        }

        self.shutdown.cancel();
        self.flush_timer
            .await
            .context("Flush timer task failed")?;

        info!(
            dropped = self.persistence.dropped_bundle_count(),
            "Telemetry pipeline stopped"
        );
        Ok(())
    }
}
