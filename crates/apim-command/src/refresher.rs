//! Polling loop reconciling the shared command store with local listeners.
//!
//! Each tick:
//! 1. Purges expired commands, on the primary node only
//! 2. Reads the commands addressed to this node's group that it has not yet
//!    acknowledged
//! 3. Deletes unicast commands and acknowledges multicast ones
//! 4. Publishes every command marked in step 3 to the local listeners
//!
//! Marking happens before publishing so a failing listener can never cause a
//! command to be read again. Ticks never overlap: `run` awaits each tick before
//! waiting for the next one, and missed ticks are skipped.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::time::{MissedTickBehavior, timeout};

use crate::cluster::ClusterOracle;
use crate::config::RefresherConfig;
use crate::error::CommandError;
use crate::fanout::CommandFanout;
use crate::model::{CastMode, Command, CommandCriteria};
use crate::store::{DynCommandStore, StoreResult};

/// Outcome of one tick, mostly for logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub purged: usize,
    pub deleted: usize,
    pub acknowledged: usize,
    pub published: usize,
    /// Commands whose delete or acknowledgment failed.
    pub failed: usize,
    /// Purge or search failed; the tick ended early.
    pub aborted: bool,
}

pub struct CommandRefresher {
    store: DynCommandStore,
    cluster: Arc<dyn ClusterOracle>,
    fanout: CommandFanout,
    config: RefresherConfig,
}

impl CommandRefresher {
    pub fn new(
        store: DynCommandStore,
        cluster: Arc<dyn ClusterOracle>,
        fanout: CommandFanout,
        config: RefresherConfig,
    ) -> Self {
        Self {
            store,
            cluster,
            fanout,
            config,
        }
    }

    pub fn config(&self) -> &RefresherConfig {
        &self.config
    }

    /// Poll the store until `shutdown` fires.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            node_id = self.cluster.node_id(),
            interval_ms = self.config.interval.as_millis() as u64,
            "command refresher started"
        );
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    if report.published > 0 || report.purged > 0 || report.failed > 0 {
                        tracing::debug!(?report, "command tick");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("command refresher stopped");
                    break;
                }
            }
        }
    }

    pub async fn tick(&self) -> TickReport {
        self.tick_at(Utc::now()).await
    }

    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        if self.cluster.is_primary() {
            match self
                .bounded("delete_by_expired_before", self.store.delete_by_expired_before(now))
                .await
            {
                Ok(purged) => {
                    report.purged = purged;
                    if purged > 0 {
                        tracing::info!(purged, "purged expired commands");
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, "failed to purge expired commands");
                    report.aborted = true;
                    return report;
                }
            }
        }

        let node_id = self.cluster.node_id();
        let criteria = CommandCriteria::new()
            .to(self.config.recipient)
            .not_tags(self.config.excluded_tags.iter().copied())
            .not_acked_by(node_id)
            .not_expired_at(now);
        let commands = match self.bounded("search", self.store.search(&criteria)).await {
            Ok(commands) => commands,
            Err(err) => {
                tracing::error!(error = %err, "failed to search commands");
                report.aborted = true;
                return report;
            }
        };

        let mut marked = Vec::with_capacity(commands.len());
        for command in commands {
            let command_id = command.id.clone();
            match self.mark(command, now, &mut report).await {
                Ok(Some(command)) => marked.push(command),
                Ok(None) => {}
                Err(err) => {
                    report.failed += 1;
                    tracing::error!(
                        command_id = %command_id,
                        error = %err,
                        "failed to mark command"
                    );
                }
            }
        }

        for command in &marked {
            self.fanout.publish(command).await;
            report.published += 1;
        }
        report
    }

    /// Delete or acknowledge `command`. Returns `None` when this node had
    /// already acknowledged it and there is nothing left to publish.
    async fn mark(
        &self,
        mut command: Command,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<Option<Command>, CommandError> {
        if command.tags.is_empty() {
            tracing::warn!(command_id = %command.id, "command without tags, treating as multicast");
        }
        match command.cast_mode() {
            CastMode::Unicast => {
                self.bounded("delete", self.store.delete(&command.id)).await?;
                report.deleted += 1;
            }
            CastMode::Multicast => {
                if !command.acknowledge(self.cluster.node_id(), now) {
                    return Ok(None);
                }
                self.bounded("update", self.store.update(command.clone()))
                    .await?;
                report.acknowledged += 1;
            }
        }
        Ok(Some(command))
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = StoreResult<T>>,
    ) -> Result<T, CommandError> {
        match timeout(self.config.store_timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(CommandError::Timeout {
                operation,
                millis: self.config.store_timeout.as_millis(),
            }),
        }
    }
}
