//! Tether keeps a set of cloud variables and a fleet of MQTT devices in sync.
//!
//! Devices report their state on a *state topic*; the value is decoded into the
//! variable it is bound to. When the application (or the cloud) writes a
//! variable, the next [`Gateway::tick`] notices the change and publishes a
//! command on the *command topic*.
//!
//! ```no_run
//! use tether::{AlwaysConnected, Gateway, MonotonicClock, MemoryTransport, Variables};
//!
//! let mut vars = Variables::new();
//! let lamp = vars.add("lamp", false);
//!
//! let mut gateway = Gateway::new(MemoryTransport::new(), AlwaysConnected, MonotonicClock::new());
//! gateway
//!     .registry_mut()
//!     .add(lamp)
//!     .state_topic("lamp/state")
//!     .command_topic("lamp/set")
//!     .state_payload("ON", "OFF");
//!
//! loop {
//!     gateway.tick(&mut vars).unwrap();
//! }
//! ```

pub mod clock;
pub mod config;
pub mod gateway;
pub mod log;
pub mod mqtt;
pub mod property;
pub mod registry;
pub mod transport;
pub mod variables;

pub use tether_common as common;
use tether_common::{TetherString, ValueKind};

pub use self::{
    clock::{Clock, ManualClock, MonotonicClock},
    gateway::{DEBOUNCE_WINDOW, Gateway, GatewayState, RouteReport},
    mqtt::{BrokerProbe, MqttTransport},
    property::{Property, PropertyKind},
    registry::{PropertyBuilder, Registry},
    transport::{AlwaysConnected, Connectivity, MemoryTransport, Transport},
    variables::{Scalar, Var, Variables},
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("mqtt transport error: {0}")]
    MqttTransport(#[from] mqtt_endpoint_tokio::mqtt_ep::TransportError),
    #[error("mqtt connection error: {0}")]
    MqttConnection(#[from] mqtt_endpoint_tokio::mqtt_ep::ConnectionError),
    #[error("mqtt packet field error: {0}")]
    MqttPacketField(&'static str),
    #[error("mqtt packet error: {0}")]
    MqttPacket(mqtt_endpoint_tokio::mqtt_ep::result_code::MqttError),
    #[error("transport not started")]
    NotStarted,
    #[error("transport channel closed")]
    ChannelClosed,
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("property {property}: on/off payloads are not supported on {kind} properties")]
    IncompatiblePayload { property: TetherString, kind: ValueKind },
    #[error("variable {variable}: initial value is not a valid {kind}")]
    InvalidInitial { variable: TetherString, kind: ValueKind },
    #[error("variable {0} is defined more than once")]
    DuplicateVariable(TetherString),
    #[error("transport bring-up failed: {0}")]
    Startup(Box<Error>),
    #[error("gateway halted after a fatal error")]
    Halted,
}

impl From<mqtt_endpoint_tokio::mqtt_ep::result_code::MqttError> for Error {
    fn from(e: mqtt_endpoint_tokio::mqtt_ep::result_code::MqttError) -> Self {
        Error::MqttPacket(e)
    }
}
