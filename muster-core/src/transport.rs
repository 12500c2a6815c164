use arc_swap::ArcSwapOption;
use backoff::backoff::Backoff;
use muster_error::{TransportError, TransportResult};
use muster_models::{
    build_exponential_backoff,
    settings::{BrokerConfig, TopicsConfig},
    wire, CommandPublisher, InboundFrame, SensorCommand, SensorId,
};
use rumqttc::{AsyncClient, ClientError, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Capacity of rumqttc's internal request channel, and the bound reported
/// when `try_publish` finds it full.
const REQUEST_CHANNEL_CAPACITY: usize = 100;

/// Broker link connection state, broadcast over a watch channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed(String),
}

/// Shared client entry for lock-free access.
///
/// The supervisor owns the lifecycle and swaps the client in and out on
/// connection and disconnection; publishers read it without locking.
struct ClientEntry {
    client: ArcSwapOption<AsyncClient>,
    /// Health flag for fast-path checks
    healthy: AtomicBool,
    /// Last error message for observability
    last_error: Mutex<Option<String>>,
}

impl ClientEntry {
    #[inline]
    fn new_empty() -> Self {
        Self {
            client: ArcSwapOption::from(None),
            healthy: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    #[inline]
    fn update_error(&self, error: String) {
        if let Ok(mut last_error) = self.last_error.lock() {
            *last_error = Some(error);
        }
    }

    #[inline]
    fn clear_error(&self) {
        if let Ok(mut last_error) = self.last_error.lock() {
            *last_error = None;
        }
    }

    #[inline]
    fn get_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|guard| guard.clone())
    }

    fn mark_down(&self) {
        self.client.store(None);
        self.healthy.store(false, Ordering::Release);
    }
}

/// Handle to the supervised MQTT link.
///
/// [`start`](Self::start) spawns a supervisor task that owns the connection
/// lifecycle: connect, subscribe to every device's reading topic, forward
/// publishes into the inbound channel, and reconnect with exponential
/// backoff after any loss. The handle itself is the command publisher; it
/// stays valid across reconnects.
pub struct MqttLink {
    entry: Arc<ClientEntry>,
    qos: QoS,
    command_suffix: String,
    state_rx: watch::Receiver<LinkState>,
}

impl MqttLink {
    pub fn start(
        broker: BrokerConfig,
        topics: &TopicsConfig,
        sensor_ids: Vec<SensorId>,
        frame_tx: mpsc::Sender<InboundFrame>,
        cancel: CancellationToken,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(LinkState::Disconnected);
        let entry = Arc::new(ClientEntry::new_empty());
        let reading_topics: Vec<String> = sensor_ids
            .iter()
            .map(|id| wire::reading_topic(id, &topics.reading_suffix))
            .collect();

        let link = Self {
            entry: Arc::clone(&entry),
            qos: qos_from_level(broker.qos),
            command_suffix: topics.command_suffix.clone(),
            state_rx,
        };
        tokio::spawn(supervise(
            broker,
            reading_topics,
            frame_tx,
            cancel,
            state_tx,
            entry,
        ));
        link
    }

    /// Receiver for link state transitions.
    pub fn state_rx(&self) -> watch::Receiver<LinkState> {
        self.state_rx.clone()
    }

    /// Most recent transport error, if any.
    pub fn last_error(&self) -> Option<String> {
        self.entry.get_error()
    }

    /// Wait until the link reports `Connected`, up to `timeout`.
    ///
    /// Returns `false` on timeout or if the supervisor has gone away. The
    /// caller decides whether to proceed anyway; commands sent while
    /// disconnected are refused, not queued.
    pub async fn wait_connected(&self, timeout: std::time::Duration) -> bool {
        let mut rx = self.state_rx.clone();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if matches!(*rx.borrow_and_update(), LinkState::Connected) {
                return true;
            }
            match tokio::time::timeout_at(deadline, rx.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) | Err(_) => return false,
            }
        }
    }
}

impl CommandPublisher for MqttLink {
    fn try_publish(&self, sensor: &SensorId, command: SensorCommand) -> TransportResult<()> {
        if !self.entry.healthy.load(Ordering::Acquire) {
            return Err(TransportError::NotConnected);
        }
        let Some(client) = self.entry.client.load_full() else {
            return Err(TransportError::NotConnected);
        };
        let topic = wire::command_topic(sensor, &self.command_suffix);
        client
            .try_publish(topic, self.qos, false, command.format())
            .map_err(|e| match e {
                ClientError::TryRequest(_) => TransportError::QueueFull {
                    capacity: REQUEST_CHANNEL_CAPACITY,
                },
                other => TransportError::Publish {
                    reason: other.to_string(),
                },
            })
    }
}

fn qos_from_level(level: u8) -> QoS {
    match level {
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

fn connect_client(broker: &BrokerConfig) -> (AsyncClient, EventLoop) {
    // Random suffix keeps restarted instances from evicting each other's
    // broker session.
    let nonce = Uuid::new_v4().simple().to_string();
    let client_id = format!("{}-{}", broker.client_id_prefix, &nonce[..8]);

    let mut mqtt_options = MqttOptions::new(client_id, &broker.host, broker.port);
    if let (Some(username), Some(password)) = (&broker.username, &broker.password) {
        mqtt_options.set_credentials(username, password);
    }
    mqtt_options.set_keep_alive(std::time::Duration::from_secs(broker.keep_alive_secs));
    mqtt_options.set_clean_session(broker.clean_session);

    AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY)
}

/// Supervisor loop with auto-reconnect.
///
/// Max attempts semantics: `None` or `Some(0)` retries without limit,
/// `Some(n)` gives up after `n` consecutive failed connections. A
/// connection that reached `Connected` resets both the attempt counter and
/// the backoff.
async fn supervise(
    broker: BrokerConfig,
    reading_topics: Vec<String>,
    frame_tx: mpsc::Sender<InboundFrame>,
    cancel: CancellationToken,
    state_tx: watch::Sender<LinkState>,
    entry: Arc<ClientEntry>,
) {
    let qos = qos_from_level(broker.qos);
    let mut bo = build_exponential_backoff(&broker.retry);
    let mut attempt: u32 = 0;

    let should_retry = |current_attempt: u32| -> bool {
        match broker.retry.max_attempts {
            None | Some(0) => true,
            Some(max) => current_attempt < max,
        }
    };

    loop {
        if cancel.is_cancelled() {
            let _ = state_tx.send(LinkState::Disconnected);
            info!("mqtt supervisor cancelled");
            break;
        }
        if !should_retry(attempt) {
            let reason = format!(
                "max connect attempts ({:?}) exhausted",
                broker.retry.max_attempts
            );
            warn!(max_attempts = ?broker.retry.max_attempts, "mqtt supervisor giving up");
            let _ = state_tx.send(LinkState::Failed(reason));
            break;
        }

        attempt += 1;
        info!(attempt, host = %broker.host, port = broker.port, "mqtt connecting");
        let _ = state_tx.send(LinkState::Connecting);

        let (client, event_loop) = connect_client(&broker);
        let seen_active = run_event_loop(
            client,
            event_loop,
            &reading_topics,
            qos,
            cancel.child_token(),
            &state_tx,
            &frame_tx,
            &entry,
        )
        .await;

        if seen_active {
            bo.reset();
            attempt = 0;
        }
        if cancel.is_cancelled() {
            info!("mqtt supervisor cancelled after event loop");
            break;
        }

        match bo.next_backoff() {
            Some(delay) => {
                let _ = state_tx.send(LinkState::Reconnecting);
                info!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "mqtt reconnect backoff"
                );
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("reconnect backoff cancelled");
                        break;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            None => {
                warn!("mqtt reconnect backoff exhausted");
                let _ = state_tx.send(LinkState::Failed("backoff time exhausted".to_string()));
                break;
            }
        }
    }

    entry.mark_down();
    info!("mqtt supervisor loop terminated");
}

async fn subscribe_reading_topics(
    client: &AsyncClient,
    topics: &[String],
    qos: QoS,
) -> TransportResult<()> {
    for topic in topics {
        client
            .subscribe(topic, qos)
            .await
            .map_err(|e| TransportError::SubscribeFailed {
                topic: topic.clone(),
                reason: e.to_string(),
            })?;
        debug!(topic = %topic, "subscribed to reading topic");
    }
    info!(topic_count = topics.len(), "subscribed to all reading topics");
    Ok(())
}

/// Drive one MQTT session until disconnection or cancellation.
///
/// Returns whether the session ever reached `Connected`; the caller uses
/// that to reset its backoff.
#[allow(clippy::too_many_arguments)]
async fn run_event_loop(
    client: AsyncClient,
    mut event_loop: EventLoop,
    reading_topics: &[String],
    qos: QoS,
    cancel: CancellationToken,
    state_tx: &watch::Sender<LinkState>,
    frame_tx: &mpsc::Sender<InboundFrame>,
    entry: &Arc<ClientEntry>,
) -> bool {
    let mut seen_active = false;
    let mut subscribed = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("event loop cancelled, disconnecting");
                entry.mark_down();
                let _ = state_tx.send(LinkState::Disconnected);
                let _ = client.disconnect().await;
                break;
            }
            result = event_loop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt connection established");
                        seen_active = true;
                        let _ = state_tx.send(LinkState::Connected);

                        entry.client.store(Some(Arc::new(client.clone())));
                        entry.healthy.store(true, Ordering::Release);
                        entry.clear_error();

                        // Subscribe immediately after ConnAck so no reading
                        // published in the meantime is missed.
                        if !subscribed {
                            match subscribe_reading_topics(&client, reading_topics, qos).await {
                                Ok(()) => subscribed = true,
                                Err(e) => {
                                    warn!(error = %e, "reading topic subscription failed");
                                    entry.update_error(e.to_string());
                                }
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        info!("mqtt server sent disconnect");
                        entry.mark_down();
                        entry.update_error("server sent disconnect".to_string());
                        let _ = state_tx.send(LinkState::Disconnected);
                        break;
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let frame = InboundFrame {
                            topic: publish.topic,
                            payload: publish.payload,
                        };
                        // Bounded send: if the driver is behind, the event
                        // loop waits here rather than dropping readings.
                        if frame_tx.send(frame).await.is_err() {
                            warn!("inbound channel closed, terminating event loop");
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::PingResp)) => {
                        debug!("mqtt ping response received");
                    }
                    Ok(event) => {
                        debug!(?event, "mqtt event");
                    }
                    Err(e) => {
                        warn!(error = %e, "mqtt event loop error");
                        entry.mark_down();
                        entry.update_error(e.to_string());
                        let _ = state_tx.send(LinkState::Failed(e.to_string()));
                        break;
                    }
                }
            }
        }
    }

    seen_active
}
