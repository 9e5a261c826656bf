//! The pub/sub seam between the gateway and a broker.
//!
//! The gateway drives a [`Transport`] from its tick: it asks it to
//! process pending traffic and receives every inbound message synchronously
//! through the handler passed to [`Transport::process_once`].

use crate::Result;

mod memory;

pub use memory::MemoryTransport;

/// Inbound message callback: `(topic, payload)`.
pub type MessageHandler<'a> = dyn FnMut(&str, &[u8]) + 'a;

pub trait Transport {
    /// Bring the transport up. Called exactly once, before any other method.
    fn start(&mut self) -> Result<()>;

    fn subscribe(&mut self, filter: &str) -> Result<()>;

    /// Fire-and-forget publish.
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()>;

    /// Process pending traffic, handing each inbound message to `handler`.
    fn process_once(&mut self, handler: &mut MessageHandler<'_>) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn start(&mut self) -> Result<()> {
        (**self).start()
    }

    fn subscribe(&mut self, filter: &str) -> Result<()> {
        (**self).subscribe(filter)
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        (**self).publish(topic, payload)
    }

    fn process_once(&mut self, handler: &mut MessageHandler<'_>) -> Result<()> {
        (**self).process_once(handler)
    }
}

/// Whether the prerequisites for starting the transport are met (network up,
/// broker reachable, cloud session established...).
pub trait Connectivity {
    fn is_connected(&self) -> bool;
}

/// Connectivity that is always satisfied.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysConnected;

impl Connectivity for AlwaysConnected {
    fn is_connected(&self) -> bool {
        true
    }
}

impl<F: Fn() -> bool> Connectivity for F {
    fn is_connected(&self) -> bool {
        self()
    }
}
