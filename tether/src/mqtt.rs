//! MQTT v5 client transport.
//!
//! Socket I/O runs on tokio tasks; the gateway talks to them through channels
//! so that its tick stays synchronous.

use std::{
    net::{TcpStream, ToSocketAddrs},
    sync::{
        Arc,
        atomic::{AtomicU16, Ordering},
    },
    time::Duration,
};

use mqtt_endpoint_tokio::mqtt_ep::{
    self, Endpoint,
    packet::v5_0,
    role,
    transport::{TcpTransport, connect_helper},
};
use mqtt_protocol_core::mqtt::packet::{
    Qos, SubEntry, SubOpts,
    v5_0::{Connack, Publish},
};
use tokio::{
    runtime::Handle,
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError},
};

use crate::{
    Error, Result,
    transport::{Connectivity, MessageHandler, Transport},
};

type Message = (String, Vec<u8>);

enum Outbound {
    Subscribe(String),
    Publish { topic: String, payload: Vec<u8> },
}

struct Connection {
    endpoint: Endpoint<role::Client>,
    next_packet_id: AtomicU16,
}

impl Connection {
    async fn connect(client_id: &str, addr: &str) -> Result<Self> {
        let endpoint = mqtt_ep::endpoint::Endpoint::<role::Client>::new(mqtt_ep::Version::V5_0);

        let tcp_stream = connect_helper::connect_tcp(addr, None).await?;
        let transport = TcpTransport::from_stream(tcp_stream);
        endpoint
            .attach(transport, mqtt_ep::endpoint::Mode::Client)
            .await?;

        let connect = v5_0::Connect::builder().client_id(client_id)?.build()?;
        endpoint.send(connect).await?;

        let packet = endpoint.recv().await?;
        let connack: Connack = packet.try_into().map_err(Error::MqttPacketField)?;
        tracing::debug!("Received CONNACK: {connack:?}");

        Ok(Self { endpoint, next_packet_id: AtomicU16::new(1) })
    }

    fn next_packet_id(&self) -> u16 {
        loop {
            let id = self.next_packet_id.fetch_add(1, Ordering::Relaxed);

            if id != 0 {
                break id;
            }
        }
    }

    async fn recv(&self) -> Result<Message> {
        loop {
            let packet = self.endpoint.recv().await?;

            let publish: Result<Publish, _> = packet.try_into();
            if let Ok(publish) = publish {
                break Ok((publish.topic_name().to_owned(), publish.payload().as_slice().to_vec()));
            }
        }
    }

    async fn subscribe(&self, filter: &str) -> Result<()> {
        let subscribe = v5_0::Subscribe::builder()
            .packet_id(self.next_packet_id())
            .entries(vec![SubEntry::new(
                filter.to_string(),
                SubOpts::new().set_qos(Qos::AtLeastOnce),
            )?])
            .build()?;

        tracing::info!("Subscribing to topic '{filter}'");

        self.endpoint
            .register_packet_id(subscribe.packet_id())
            .await?;

        self.endpoint.send(subscribe).await?;

        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let packet_id = self.next_packet_id();

        let publish = v5_0::Publish::builder()
            .topic_name(topic.to_string())?
            .payload(payload)
            .qos(Qos::AtLeastOnce)
            .retain(false)
            .packet_id(packet_id)
            .build()?;

        tracing::trace!("Publishing MQTT message: {publish:#?}");

        self.endpoint.register_packet_id(packet_id).await?;
        self.endpoint.send(publish).await?;

        Ok(())
    }
}

struct Link {
    outbound: UnboundedSender<Outbound>,
    inbound: UnboundedReceiver<Message>,
}

/// [`Transport`] over an MQTT broker.
///
/// [`start`](Transport::start) connects synchronously by blocking on the given
/// runtime, so the gateway must not be ticked from inside an async task; run it
/// on a dedicated thread or in `spawn_blocking`.
pub struct MqttTransport {
    client_id: String,
    addr: String,
    runtime: Handle,
    link: Option<Link>,
}

impl MqttTransport {
    pub fn new(client_id: impl Into<String>, addr: impl Into<String>, runtime: Handle) -> Self {
        Self {
            client_id: client_id.into(),
            addr: addr.into(),
            runtime,
            link: None,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn link(&mut self) -> Result<&mut Link> {
        self.link.as_mut().ok_or(Error::NotStarted)
    }

    fn send(&mut self, msg: Outbound) -> Result<()> {
        self.link()?
            .outbound
            .send(msg)
            .map_err(|_| Error::ChannelClosed)
    }
}

impl Transport for MqttTransport {
    fn start(&mut self) -> Result<()> {
        let conn = self
            .runtime
            .block_on(Connection::connect(&self.client_id, &self.addr))?;
        let conn = Arc::new(conn);

        tracing::info!("Connected to mqtt://{} as {}", self.addr, self.client_id);

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();

        self.runtime.spawn({
            let conn = conn.clone();

            async move {
                loop {
                    match conn.recv().await {
                        Ok(msg) => {
                            if inbound_tx.send(msg).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::error!("MQTT connection lost: {e}");
                            break;
                        }
                    }
                }
            }
        });

        self.runtime.spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let res = match msg {
                    Outbound::Subscribe(filter) => conn.subscribe(&filter).await,
                    Outbound::Publish { topic, payload } => conn.publish(&topic, payload).await,
                };

                if let Err(e) = res {
                    tracing::warn!("MQTT send failed: {e}");
                }
            }
        });

        self.link = Some(Link { outbound: outbound_tx, inbound: inbound_rx });

        Ok(())
    }

    fn subscribe(&mut self, filter: &str) -> Result<()> {
        self.send(Outbound::Subscribe(filter.to_owned()))
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        self.send(Outbound::Publish { topic: topic.to_owned(), payload: payload.to_vec() })
    }

    fn process_once(&mut self, handler: &mut MessageHandler<'_>) -> Result<()> {
        let link = self.link()?;

        loop {
            match link.inbound.try_recv() {
                Ok((topic, payload)) => handler(&topic, &payload),
                Err(TryRecvError::Empty) => break Ok(()),
                Err(TryRecvError::Disconnected) => break Err(Error::ChannelClosed),
            }
        }
    }
}

/// Connectivity check that succeeds once the broker accepts TCP connections.
#[derive(Debug, Clone)]
pub struct BrokerProbe {
    addr: String,
    timeout: Duration,
}

impl BrokerProbe {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into(), timeout: Duration::from_secs(1) }
    }

    pub fn timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }
}

impl Connectivity for BrokerProbe {
    fn is_connected(&self) -> bool {
        let Ok(addrs) = self.addr.to_socket_addrs() else {
            tracing::debug!(addr = %self.addr, "Cannot resolve broker address");
            return false;
        };

        addrs
            .into_iter()
            .any(|addr| TcpStream::connect_timeout(&addr, self.timeout).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn not_started() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let mut transport = MqttTransport::new("tether", "127.0.0.1:1883", runtime.handle().clone());

        assert!(matches!(transport.publish("a", b"b"), Err(Error::NotStarted)));
        assert!(matches!(transport.subscribe("#"), Err(Error::NotStarted)));
        assert!(matches!(transport.process_once(&mut |_, _| {}), Err(Error::NotStarted)));
    }

    #[test]
    fn broker_probe() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        assert!(BrokerProbe::new(addr.to_string()).is_connected());
        assert!(!BrokerProbe::new("not an address").is_connected());
    }
}
