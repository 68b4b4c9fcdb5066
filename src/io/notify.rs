//! Outbound notification queue
//!
//! The sensing loop enqueues with `try_send` and never waits; if the queue is
//! full the message is dropped and counted. A single worker drains the queue,
//! sending at most one message per `min_send_interval` through a `Transport`.
//! Failed sends are logged and dropped.

use crate::domain::types::{ClosedTicket, SlotId, TicketId};
use crate::infra::config::{Config, TransportKind};
use crate::infra::metrics::Metrics;
use crate::infra::supervisor::{spawn_supervised, RestartPolicy, TaskExit};
use crate::io::mqtt::MqttTransport;
use crate::io::telegram::TelegramTransport;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const WORKER_RESTART_BACKOFF: Duration = Duration::from_secs(1);

/// Delivery backend for notification text
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, recipient: &str, text: &str) -> anyhow::Result<()>;
}

/// A pending message
#[derive(Debug, Clone)]
pub struct Notification {
    pub recipients: Arc<[String]>,
    pub text: String,
    /// When the message was enqueued (for queue delay measurement)
    pub enqueued_at: Instant,
}

pub fn ticket_closed_text(ticket: &ClosedTicket) -> String {
    format!(
        "✅ Ticket CLOSED\nID:{}\nSlot:{}\nDuration:{}min\nFee:${:.2}\nTime-In:{}\nTime-Out:{}",
        ticket.id, ticket.slot, ticket.duration_min, ticket.fee, ticket.time_in, ticket.time_out
    )
}

pub fn car_entered_text(slot: SlotId, ticket: TicketId, time_in: &str) -> String {
    format!("🚘 Car IN\nID:{ticket}\nSlot:{slot}\nTime-In:{time_in}")
}

pub fn lot_full_text() -> String {
    "🚧 Parking is FULL! No space available.".to_string()
}

pub fn slot_free_text(slot: SlotId) -> String {
    format!("🚗 Slot {slot} is now FREE!")
}

/// Sender handle for the sensing loop
///
/// Clone to share. Non-blocking - if the channel is full, messages are dropped.
#[derive(Clone)]
pub struct NotificationSender {
    tx: mpsc::Sender<Notification>,
    recipients: Arc<[String]>,
    metrics: Arc<Metrics>,
}

impl NotificationSender {
    pub fn new(tx: mpsc::Sender<Notification>, recipients: Vec<String>, metrics: Arc<Metrics>) -> Self {
        Self { tx, recipients: recipients.into(), metrics }
    }

    /// Enqueue `text` for every configured recipient. Returns false if dropped.
    pub fn notify(&self, text: String) -> bool {
        let msg = Notification {
            recipients: self.recipients.clone(),
            text,
            enqueued_at: Instant::now(),
        };
        match self.tx.try_send(msg) {
            Ok(()) => {
                self.metrics.record_notification_enqueued();
                true
            }
            Err(mpsc::error::TrySendError::Full(msg)) => {
                self.metrics.record_notification_dropped();
                warn!(text_len = msg.text.len(), "notification_dropped_queue_full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.metrics.record_notification_dropped();
                debug!("notification_dropped_worker_gone");
                false
            }
        }
    }

    pub fn ticket_closed(&self, ticket: &ClosedTicket) -> bool {
        self.notify(ticket_closed_text(ticket))
    }

    pub fn car_entered(&self, slot: SlotId, ticket: TicketId, time_in: &str) -> bool {
        self.notify(car_entered_text(slot, ticket, time_in))
    }

    pub fn lot_full(&self) -> bool {
        self.notify(lot_full_text())
    }

    pub fn slot_free(&self, slot: SlotId) -> bool {
        self.notify(slot_free_text(slot))
    }
}

/// Create a notification channel pair
///
/// Returns the sender (for the sensing loop) and the receiver (for the worker).
pub fn create_notification_channel(
    capacity: usize,
    recipients: Vec<String>,
    metrics: Arc<Metrics>,
) -> (NotificationSender, mpsc::Receiver<Notification>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (NotificationSender::new(tx, recipients, metrics), rx)
}

/// Drains the queue through a transport at a bounded rate
///
/// Cheap to clone; clones share the receiver, so a restarted worker picks up
/// where the previous one stopped.
#[derive(Clone)]
pub struct NotificationWorker {
    rx: Arc<Mutex<mpsc::Receiver<Notification>>>,
    transport: Arc<dyn Transport>,
    min_send_interval: Duration,
    metrics: Arc<Metrics>,
}

impl NotificationWorker {
    pub fn new(
        rx: mpsc::Receiver<Notification>,
        transport: Arc<dyn Transport>,
        min_send_interval: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { rx: Arc::new(Mutex::new(rx)), transport, min_send_interval, metrics }
    }

    /// Run until shutdown or until every sender is gone
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(transport = self.transport.name(), "notification_worker_started");
        let mut rx = self.rx.lock().await;
        let mut last_send: Option<Instant> = None;

        loop {
            if *shutdown.borrow() {
                break;
            }
            let msg = tokio::select! {
                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
                res = shutdown.changed() => {
                    if res.is_err() {
                        break;
                    }
                    continue;
                }
            };

            for recipient in msg.recipients.iter() {
                if let Some(last) = last_send {
                    let wait = self.min_send_interval.saturating_sub(last.elapsed());
                    if !wait.is_zero() {
                        tokio::select! {
                            _ = tokio::time::sleep(wait) => {}
                            _ = shutdown.changed() => {}
                        }
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
                last_send = Some(Instant::now());
                self.deliver(recipient, &msg).await;
            }
        }

        // Undelivered messages are dropped
        let mut remaining = 0usize;
        while rx.try_recv().is_ok() {
            remaining += 1;
        }
        info!(remaining = remaining, "notification_worker_stopped");
    }

    async fn deliver(&self, recipient: &str, msg: &Notification) {
        let queue_delay_ms = msg.enqueued_at.elapsed().as_millis() as u64;
        let start = Instant::now();
        match self.transport.send(recipient, &msg.text).await {
            Ok(()) => {
                self.metrics.record_notification_sent();
                info!(
                    transport = self.transport.name(),
                    recipient = %recipient,
                    queue_delay_ms = %queue_delay_ms,
                    send_ms = %start.elapsed().as_millis(),
                    "notification_sent"
                );
            }
            Err(e) => {
                self.metrics.record_notification_failed();
                warn!(
                    transport = self.transport.name(),
                    recipient = %recipient,
                    error = %e,
                    "notification_send_failed"
                );
            }
        }
    }
}

/// Transport selected by `[notify] transport`.
///
/// Telegram without a usable bot token falls back to the log transport. The
/// MQTT transport spawns its event loop, so this must run inside a runtime.
pub fn build_transport(config: &Config) -> Arc<dyn Transport> {
    match config.notify_transport() {
        TransportKind::Telegram => match TelegramTransport::from_config(config) {
            Ok(transport) => Arc::new(transport),
            Err(e) => {
                warn!(error = %format!("{e:#}"), "telegram_unavailable_using_log");
                Arc::new(LogTransport)
            }
        },
        TransportKind::Mqtt => Arc::new(MqttTransport::new(config)),
        TransportKind::Log => Arc::new(LogTransport),
    }
}

/// Create the queue, spawn its supervised worker and enqueue the startup
/// message if one is configured.
///
/// Returns `None` when notifications are disabled.
pub fn start_notifications(
    config: &Config,
    transport: Arc<dyn Transport>,
    metrics: Arc<Metrics>,
    shutdown: watch::Receiver<bool>,
) -> Option<(NotificationSender, JoinHandle<TaskExit>)> {
    if !config.notify_enabled() {
        return None;
    }
    if config.notify_recipients().is_empty() {
        warn!("notify_no_recipients");
    }

    let (notifier, rx) = create_notification_channel(
        config.notify_queue_capacity(),
        config.notify_recipients().to_vec(),
        metrics.clone(),
    );
    let worker = NotificationWorker::new(
        rx,
        transport,
        Duration::from_millis(config.notify_min_send_interval_ms()),
        metrics,
    );
    let worker_shutdown = shutdown.clone();
    let handle = spawn_supervised(
        "notification_worker",
        RestartPolicy::OnPanic { backoff: WORKER_RESTART_BACKOFF },
        shutdown,
        move || worker.clone().run(worker_shutdown.clone()),
    );

    if let Some(text) = config.startup_message() {
        notifier.notify(text.to_string());
    }
    Some((notifier, handle))
}

/// Writes messages to the log instead of delivering them
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, recipient: &str, text: &str) -> anyhow::Result<()> {
        info!(recipient = %recipient, text = %text, "notification");
        Ok(())
    }
}
