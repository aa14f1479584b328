//! MQTT uplink standing in for the radio on host deployments
//!
//! Each payload goes to `<topic_prefix>/<device_id>` at QoS 0. Publishing is
//! non-blocking: the request is queued for the eventloop task or refused.

use crate::infra::config::Config;
use crate::io::radio::{LinkError, RadioLink};
use rumqttc::{AsyncClient, ClientError, Event, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Requests the client queues before publishes are refused as busy
const REQUEST_QUEUE_LEN: usize = 16;

pub struct MqttRadio {
    client: AsyncClient,
    topic: String,
    /// Maintained by the eventloop task
    connected: Arc<AtomicBool>,
}

impl MqttRadio {
    /// Create the client and spawn its eventloop. Must run inside a tokio runtime.
    pub fn new(config: &Config) -> Self {
        let client_id = format!("visitor-counter-{}", config.device_id());
        let mut options = MqttOptions::new(client_id, config.uplink_host(), config.uplink_port());
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.uplink_username(), config.uplink_password())
        {
            options.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_QUEUE_LEN);
        let connected = Arc::new(AtomicBool::new(false));

        let link = connected.clone();
        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        link.store(true, Ordering::Relaxed);
                        info!("uplink_connected");
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        link.store(false, Ordering::Relaxed);
                        warn!("uplink_disconnected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if link.swap(false, Ordering::Relaxed) {
                            warn!(error = %e, "uplink_connection_lost");
                        } else {
                            debug!(error = %e, "uplink_connect_failed");
                        }
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        let topic = format!("{}/{}", config.uplink_topic_prefix(), config.device_id());
        info!(
            host = %config.uplink_host(),
            port = %config.uplink_port(),
            topic = %topic,
            "uplink_started"
        );

        Self::from_client(client, topic, connected)
    }

    pub fn from_client(client: AsyncClient, topic: String, connected: Arc<AtomicBool>) -> Self {
        Self { client, topic, connected }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl RadioLink for MqttRadio {
    fn send(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(LinkError::Unreachable("broker not connected".to_string()));
        }

        match self.client.try_publish(&self.topic, QoS::AtMostOnce, false, payload.to_vec()) {
            Ok(()) => Ok(()),
            Err(ClientError::TryRequest(_)) => Err(LinkError::Busy),
            Err(e) => Err(LinkError::Unreachable(e.to_string())),
        }
    }
}
