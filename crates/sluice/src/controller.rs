//! Component wiring and lifecycle
//!
//! ```text
//! receivers ─► Intake ─► AcceptorPipeline ─┬─ async ─► Journal ─┐
//!                                          └─ skip ───────────┤
//!                                                             ▼
//!   Producer ◄── PostPipeline ◄── Dispatcher (per-tag stages) ◄┘
//!      │
//!      └─► senders ──► completion ──► Journal commit
//! ```
//!
//! Everything shares one cancellation token. Shutdown cancels it, waits for
//! each task group in pipeline order and finally closes the journal.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sluice_config::{Config, MetricsFormat};
use sluice_journal::Journal;
use sluice_metrics::{MetricsRegistry, ReportFormat, Reporter, ReporterConfig};
use sluice_pipeline::{
    AcceptorPipeline, CloseHook, Dispatcher, Intake, PostPipeline, TagPipeline,
};
use sluice_protocol::MessagePool;
use sluice_sinks::producer::{Producer, distribution_key};
use sluice_sinks::registry::build_senders;
use sluice_transform::{StageContext, acceptor_filters, post_filters, tag_stages};
use tokio::io::BufReader;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::stdin::read_json_lines;

/// Tasks of one component, awaited together on shutdown
struct TaskGroup {
    name: &'static str,
    tasks: Vec<JoinHandle<()>>,
}

/// A running pipeline
pub struct Controller {
    cancel: CancellationToken,
    shutdown_timeout: Duration,
    intake: Arc<Intake>,
    journal: Arc<Journal>,
    registry: MetricsRegistry,
    groups: Vec<TaskGroup>,
}

impl Controller {
    /// Build every component and start its workers.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(config: Config) -> Result<Self> {
        let cancel = CancellationToken::new();
        let pool = Arc::new(MessagePool::new(config.global.pool_size));

        let journal = Journal::open(config.journal.clone(), Arc::clone(&pool), cancel.clone())
            .context("failed to open journal")?;
        let max_id = journal.load_max_id().context("failed to load max journal id")?;
        info!(max_id, dir = %config.journal.dir.display(), "journal opened");

        let (intake, streams) = Intake::new(&config.acceptor, Arc::clone(&pool), max_id);

        let acceptor = Arc::new(AcceptorPipeline::new(
            &config.acceptor_filters,
            acceptor_filters(&config.acceptor_filters).context("invalid acceptor filters")?,
            Arc::clone(&pool),
        ));

        let tag_pipeline = Arc::new(TagPipeline::new(
            tag_stages(&config.tag_stages).context("invalid tag stages")?,
            StageContext {
                pool: Arc::clone(&pool),
                wait_commit: journal.commit_inlet(),
                internal_size: config.tag_stages.internal_size,
            },
        ));
        let dispatcher = Arc::new(
            Dispatcher::new(
                &config.dispatcher,
                tag_pipeline,
                Arc::clone(&pool),
                cancel.clone(),
            )
            .with_close_hook(close_journal_hook(&journal)),
        );

        let post = Arc::new(PostPipeline::new(
            &config.post_filters,
            post_filters(&config.post_filters),
            Arc::clone(&pool),
            journal.commit_inlet(),
        ));

        let senders = build_senders(&config.sinks).context("invalid sinks")?;
        let producer = Arc::new(Producer::new(
            &config.producer,
            distribution_key(&config.global.host, &config.global.env),
            senders,
            Arc::clone(&pool),
            journal.commit_inlet(),
            cancel.clone(),
        ));

        let registry = MetricsRegistry::new();
        register_metrics(&registry, &pool, &intake, &acceptor, &journal, &dispatcher, &post, &producer);

        // shutdown awaits groups in this order
        let groups = vec![
            TaskGroup {
                name: "acceptor_filters",
                tasks: acceptor.run(cancel.clone(), streams.async_rx, streams.sync_rx),
            },
            TaskGroup {
                name: "journal",
                tasks: journal.run(acceptor.output(), acceptor.skip()),
            },
            TaskGroup {
                name: "dispatcher",
                tasks: dispatcher.run(journal.output()),
            },
            TaskGroup {
                name: "post_filters",
                tasks: post.run(cancel.clone(), dispatcher.output()),
            },
            TaskGroup {
                name: "producer",
                tasks: producer.run(post.output()),
            },
            TaskGroup {
                name: "reporter",
                tasks: vec![spawn_reporter(&config, registry.clone(), cancel.clone())],
            },
            TaskGroup {
                name: "heartbeat",
                tasks: vec![tokio::spawn(heartbeat(
                    config.global.heartbeat_interval,
                    cancel.clone(),
                ))],
            },
        ];

        info!(
            host = %config.global.host,
            env = %config.global.env,
            sinks = ?config.enabled_sinks(),
            "sluice running"
        );

        Ok(Self {
            cancel,
            shutdown_timeout: config.global.shutdown_timeout,
            intake,
            journal,
            registry,
            groups,
        })
    }

    /// Entry point receivers push messages into
    pub fn intake(&self) -> &Arc<Intake> {
        &self.intake
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Stop every component and close the journal
    pub async fn shutdown(self) {
        self.cancel.cancel();

        for group in self.groups {
            debug!(group = group.name, tasks = group.tasks.len(), "waiting for task group");
            for task in group.tasks {
                match tokio::time::timeout(self.shutdown_timeout, task).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(group = group.name, error = %e, "task panicked during shutdown"),
                    Err(_) => warn!(group = group.name, "task did not finish within timeout"),
                }
            }
        }

        self.journal.close_all().await;
        debug!(metrics = %self.registry.snapshot(), "final metrics");
        info!("journal closed");
    }
}

/// Start the pipeline, read stdin if asked, and run until SIGINT or SIGTERM
pub async fn run(config: Config, read_stdin: bool) -> Result<()> {
    let controller = Controller::start(config)?;

    let stdin_task = read_stdin.then(|| {
        let intake = Arc::clone(controller.intake());
        let cancel = controller.cancel_token().child_token();
        tokio::spawn(async move {
            read_json_lines(BufReader::new(tokio::io::stdin()), intake, cancel).await
        })
    });

    wait_for_shutdown().await;
    info!("shutdown signal received, stopping pipeline...");

    // stdin reads cannot be interrupted
    if let Some(task) = stdin_task {
        task.abort();
    }
    controller.shutdown().await;
    Ok(())
}

/// Close the journal of a tag once its pipeline stops
fn close_journal_hook(journal: &Arc<Journal>) -> CloseHook {
    let journal = Arc::clone(journal);
    Arc::new(move |tag: String| {
        let journal = Arc::clone(&journal);
        tokio::spawn(async move {
            if let Err(e) = journal.close_tag(&tag).await {
                debug!(tag = %tag, error = %e, "tag journal not closed");
            }
        });
    })
}

#[allow(clippy::too_many_arguments)]
fn register_metrics(
    registry: &MetricsRegistry,
    pool: &Arc<MessagePool>,
    intake: &Arc<Intake>,
    acceptor: &Arc<AcceptorPipeline>,
    journal: &Arc<Journal>,
    dispatcher: &Arc<Dispatcher>,
    post: &Arc<PostPipeline>,
    producer: &Arc<Producer>,
) {
    macro_rules! register {
        ($name:literal, $component:expr) => {{
            let component = Arc::clone($component);
            registry.register($name, move || {
                serde_json::to_value(component.snapshot()).unwrap_or_default()
            });
        }};
    }

    register!("intake", intake);
    register!("acceptor_filters", acceptor);
    register!("journal", journal);
    register!("dispatcher", dispatcher);
    register!("post_filters", post);
    register!("producer", producer);

    let pool = Arc::clone(pool);
    registry.register("pool", move || {
        serde_json::to_value(pool.metrics().snapshot()).unwrap_or_default()
    });
}

fn spawn_reporter(config: &Config, registry: MetricsRegistry, cancel: CancellationToken) -> JoinHandle<()> {
    let reporter_config = ReporterConfig {
        enabled: config.metrics.enabled,
        interval: config.metrics.interval,
        format: match config.metrics.format {
            MetricsFormat::Human => ReportFormat::Human,
            MetricsFormat::Json => ReportFormat::Json,
        },
    };
    let reporter = Reporter::new(reporter_config, registry);
    tokio::spawn(async move { reporter.run(cancel).await })
}

/// Log uptime every `interval`; zero disables
async fn heartbeat(interval: Duration, cancel: CancellationToken) {
    if interval.is_zero() {
        return;
    }
    let started = Instant::now();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                info!(uptime_secs = started.elapsed().as_secs(), "heartbeat");
            }
        }
    }
}

/// Wait for SIGINT or SIGTERM
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
#[path = "controller_test.rs"]
mod controller_test;
