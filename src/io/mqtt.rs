//! MQTT notification transport
//!
//! Publishes each message as JSON `{"site","to","text","sent_at"}` to the configured
//! topic (QoS 1). Recipients are carried in the payload; a downstream bridge
//! decides how to reach them.

use crate::infra::config::Config;
use crate::io::notify::Transport;
use anyhow::Context;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize)]
struct NotificationPayload<'a> {
    site: &'a str,
    to: &'a str,
    text: &'a str,
    /// RFC 3339, UTC
    sent_at: String,
}

fn encode_payload(site: &str, to: &str, text: &str, at: OffsetDateTime) -> anyhow::Result<Vec<u8>> {
    let sent_at = at.format(&Rfc3339).context("failed to format timestamp")?;
    let payload = NotificationPayload { site, to, text, sent_at };
    serde_json::to_vec(&payload).context("failed to encode notification")
}

pub struct MqttTransport {
    client: AsyncClient,
    topic: String,
    site_id: String,
}

impl MqttTransport {
    /// Connect to the configured broker. Must be called inside a tokio runtime.
    pub fn new(config: &Config) -> Self {
        let client_id = format!("parking-notify-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 32);

        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_notify_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        debug!("mqtt_notify_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_notify_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self {
            client,
            topic: config.mqtt_topic().to_string(),
            site_id: config.site_id().to_string(),
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    async fn send(&self, recipient: &str, text: &str) -> anyhow::Result<()> {
        let json = encode_payload(&self.site_id, recipient, text, OffsetDateTime::now_utc())?;
        self.client
            .publish(&self.topic, QoS::AtLeastOnce, false, json)
            .await
            .context("mqtt publish failed")?;
        Ok(())
    }
}
