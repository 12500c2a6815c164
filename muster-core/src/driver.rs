use crate::{
    aggregator::CycleAggregator,
    dedup::{self, Novelty},
    roster::Roster,
    scheduler::{RetryScheduler, SweepAction},
};
use chrono::{DateTime, Duration, Utc};
use muster_error::MusterResult;
use muster_models::{
    settings::{PollerConfig, TopicsConfig},
    wire, CommandPublisher, InboundFrame, PollerMetrics, Reading, RecordSink, SensorCommand,
    SensorId,
};
use std::sync::Arc;
use tokio::{sync::mpsc, time::interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The poll cycle driver: single owner of all per-device and per-cycle
/// mutable state.
///
/// Inbound readings, the scheduling boundary and the fine-grained timer tick
/// are all serialized through the dispatch loop in [`run`](Self::run); no two
/// handlers ever execute against the same device concurrently. The transport
/// hands frames over through one bounded mpsc channel and never touches
/// device state itself.
pub struct PollDriver {
    config: PollerConfig,
    period: Duration,
    reading_suffix: String,
    roster: Roster,
    scheduler: RetryScheduler,
    aggregator: CycleAggregator,
    /// Next scheduling boundary. Survives an early commit so the quiet gap
    /// until the next cycle is honored; `None` only before the first cycle.
    next_boundary: Option<DateTime<Utc>>,
    publisher: Arc<dyn CommandPublisher>,
    sink: Arc<dyn RecordSink>,
    metrics: Arc<PollerMetrics>,
    cancel: CancellationToken,
}

impl PollDriver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PollerConfig,
        topics: &TopicsConfig,
        absent_value: String,
        roster: Roster,
        publisher: Arc<dyn CommandPublisher>,
        sink: Arc<dyn RecordSink>,
        metrics: Arc<PollerMetrics>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            period: Duration::seconds(config.period_secs as i64),
            scheduler: RetryScheduler::new(&config),
            aggregator: CycleAggregator::new(absent_value),
            reading_suffix: topics.reading_suffix.clone(),
            next_boundary: None,
            config,
            roster,
            publisher,
            sink,
            metrics,
            cancel,
        }
    }

    #[inline]
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    #[inline]
    pub fn metrics(&self) -> &PollerMetrics {
        &self.metrics
    }

    /// Drive the dispatch loop until cancellation or a storage failure.
    ///
    /// The first cycle opens on the first tick; a restarted process resumes
    /// polling immediately instead of waiting out a full period. On
    /// cancellation the inbound queue is drained (a cycle may still complete
    /// and commit) but an incomplete cycle is abandoned, never force-settled.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<InboundFrame>) -> MusterResult<()> {
        info!(
            devices = self.roster.len(),
            period_secs = self.config.period_secs,
            "🚀 poll driver started"
        );
        let cancel = self.cancel.clone();
        let mut tick = interval(std::time::Duration::from_millis(
            self.config.tick_interval_ms.max(1),
        ));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("📨 poll driver cancelled");
                    break;
                }
                maybe_frame = inbound.recv() => match maybe_frame {
                    Some(frame) => self.on_inbound(frame, Utc::now()).await?,
                    None => {
                        warn!("inbound channel closed, stopping poll driver");
                        break;
                    }
                },
                _ = tick.tick() => self.on_timer_tick(Utc::now()).await?,
            }
        }

        // Drain what the transport already queued; a complete settlement in
        // the backlog still commits.
        while let Ok(frame) = inbound.try_recv() {
            self.on_inbound(frame, Utc::now()).await?;
        }
        if let Some(cycle) = self.aggregator.close() {
            debug!(
                settled = cycle.settled_count(),
                "open cycle abandoned on shutdown"
            );
        }
        info!("poll driver stopped");
        Ok(())
    }

    /// Scheduling boundary: force-settle any cycle still open, then open the
    /// next one and fan out the initial polls.
    pub async fn on_schedule_boundary(&mut self, now: DateTime<Utc>) -> MusterResult<()> {
        if self.aggregator.current().is_some() {
            let unsettled: Vec<SensorId> = self
                .roster
                .iter()
                .filter(|s| !s.state.is_settled())
                .map(|s| s.id().clone())
                .collect();
            if !unsettled.is_empty() {
                warn!(
                    unsettled = unsettled.len(),
                    "cycle overrun at boundary, force-settling"
                );
            }
            for id in unsettled {
                if let Some(sensor) = self.roster.get_mut(id.as_str()) {
                    sensor.mark_absent();
                }
                self.aggregator.mark_settled(&id);
                self.metrics.increment_absence();
            }
            self.commit(now, true).await?;
        }

        let cycle = self.aggregator.open_cycle(now, self.period);
        self.next_boundary = Some(cycle.deadline);
        info!(deadline = %cycle.deadline, "poll cycle opened");
        for sensor in self.roster.iter_mut() {
            sensor.begin_cycle(now, self.config.max_retries);
        }
        for id in self.roster.ids() {
            self.send_command(&id, SensorCommand::Poll(None));
        }
        Ok(())
    }

    /// Inbound reading: topic resolution, payload parse, dedup, settlement.
    pub async fn on_inbound(&mut self, frame: InboundFrame, now: DateTime<Utc>) -> MusterResult<()> {
        let Some(id_str) = wire::sensor_for_reading_topic(&frame.topic, &self.reading_suffix)
        else {
            self.metrics.increment_unknown_device();
            warn!(topic = %frame.topic, "message on unrecognized topic dropped");
            return Ok(());
        };
        let Some(sensor) = self.roster.get(id_str) else {
            self.metrics.increment_unknown_device();
            warn!(topic = %frame.topic, "reading from a device not on the roster dropped");
            return Ok(());
        };
        let sensor_id = sensor.id().clone();
        let watermark = sensor.last_message_id.clone();

        let reading = match Reading::parse(&frame.payload) {
            Ok(reading) => reading,
            Err(e) => {
                self.metrics.increment_malformed();
                warn!(sensor = %sensor_id, error = %e, "malformed reading dropped");
                return Ok(());
            }
        };

        match dedup::classify(watermark.as_deref(), &reading.message_id) {
            Novelty::Duplicate => {
                // Re-ack in any state: the device is retransmitting exactly
                // because an earlier ack was lost.
                self.metrics.increment_duplicate();
                debug!(
                    sensor = %sensor_id,
                    message_id = %reading.message_id,
                    "duplicate delivery re-acknowledged"
                );
                self.send_command(&sensor_id, SensorCommand::Ack);
            }
            Novelty::Novel => self.accept_novel(sensor_id, reading, now).await?,
        }
        Ok(())
    }

    /// Fine-grained timer: boundary check first, then the timeout sweep.
    pub async fn on_timer_tick(&mut self, now: DateTime<Utc>) -> MusterResult<()> {
        let boundary_due = match self.aggregator.current() {
            Some(cycle) => cycle.is_expired(now),
            None => self.next_boundary.map_or(true, |boundary| now >= boundary),
        };
        if boundary_due {
            return self.on_schedule_boundary(now).await;
        }

        let Some(cycle) = self.aggregator.current() else {
            // Cycle committed early; stay quiet until the boundary.
            return Ok(());
        };
        let deadline = cycle.deadline;
        for action in self.scheduler.sweep(&mut self.roster, deadline, now) {
            match action {
                SweepAction::Repoll { sensor, quiet_secs } => {
                    self.metrics.increment_repoll();
                    debug!(sensor = %sensor, quiet_secs, "re-polling after timeout");
                    self.send_command(&sensor, SensorCommand::Poll(Some(quiet_secs)));
                }
                SweepAction::Exhausted { sensor } => {
                    self.metrics.increment_absence();
                    warn!(sensor = %sensor, "retry budget exhausted, settling absent");
                    self.aggregator.mark_settled(&sensor);
                }
            }
        }
        if self.aggregator.is_complete(self.roster.len()) {
            self.commit(now, false).await?;
        }
        Ok(())
    }

    /// Handle a novel reading under the open cycle's settlement rules.
    async fn accept_novel(
        &mut self,
        sensor_id: SensorId,
        reading: Reading,
        now: DateTime<Utc>,
    ) -> MusterResult<()> {
        let Some(cycle) = self.aggregator.current() else {
            self.metrics.increment_unsolicited();
            debug!(sensor = %sensor_id, "unsolicited reading outside any cycle dropped");
            return Ok(());
        };
        if cycle.is_settled(&sensor_id) {
            // Settlement is final for the cycle; the first writer wins.
            self.metrics.increment_late_settlement();
            warn!(
                sensor = %sensor_id,
                message_id = %reading.message_id,
                "novel reading after settlement dropped"
            );
            return Ok(());
        }

        if let Some(sensor) = self.roster.get_mut(sensor_id.as_str()) {
            sensor.accept(reading.message_id, reading.value, self.config.max_retries);
        }
        self.metrics.increment_novel();
        self.send_command(&sensor_id, SensorCommand::Ack);
        self.aggregator.mark_settled(&sensor_id);
        debug!(
            sensor = %sensor_id,
            settled = self.aggregator.current().map(|c| c.settled_count()).unwrap_or(0),
            "reading accepted"
        );

        if self.aggregator.is_complete(self.roster.len()) {
            self.commit(now, false).await?;
        }
        Ok(())
    }

    /// Build and append the cycle record, then reset for the next cycle.
    /// Exactly one commit per cycle; append failures propagate to the caller.
    async fn commit(&mut self, now: DateTime<Utc>, forced: bool) -> MusterResult<()> {
        let record = self.aggregator.build_record(&self.roster, now);
        self.sink.append(&record).await?;
        self.aggregator.close();
        for sensor in self.roster.iter_mut() {
            sensor.finish_cycle();
        }
        self.metrics.record_commit(now, forced);
        info!(forced, values = record.values().len(), "📊 cycle committed");
        Ok(())
    }

    /// Fire-and-forget command emission; refusal is counted, never retried
    /// here. Re-polling is the cycle-level recovery path.
    fn send_command(&self, sensor: &SensorId, command: SensorCommand) {
        if let Err(e) = self.publisher.try_publish(sensor, command) {
            self.metrics.increment_publish_failure();
            warn!(sensor = %sensor, error = %e, "command publish failed");
        }
    }
}
