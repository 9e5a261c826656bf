use std::collections::VecDeque;

use super::{MessageHandler, Transport};
use crate::{Error, Result};

/// In-process broker with a single client.
///
/// Published messages are recorded and, like on a real broker, delivered back
/// to the client if it is subscribed to their topic. Only literal filters and
/// `#` are understood.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    start_count: usize,
    fail_start: Option<String>,
    subscriptions: Vec<String>,
    published: Vec<(String, Vec<u8>)>,
    inbound: VecDeque<(String, Vec<u8>)>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose bring-up fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self { fail_start: Some(reason.into()), ..Self::default() }
    }

    /// Queue a message as if a device had published it.
    pub fn inject(&mut self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) {
        self.inbound.push_back((topic.into(), payload.into()));
    }

    pub fn published(&self) -> &[(String, Vec<u8>)] {
        &self.published
    }

    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }

    pub fn start_count(&self) -> usize {
        self.start_count
    }

    fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions
            .iter()
            .any(|filter| filter == "#" || filter == topic)
    }
}

impl Transport for MemoryTransport {
    fn start(&mut self) -> Result<()> {
        self.start_count += 1;

        match &self.fail_start {
            Some(reason) => Err(Error::Io(std::io::Error::other(reason.clone()))),
            None => Ok(()),
        }
    }

    fn subscribe(&mut self, filter: &str) -> Result<()> {
        self.subscriptions.push(filter.to_owned());
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        self.published.push((topic.to_owned(), payload.to_vec()));

        if self.is_subscribed(topic) {
            self.inbound.push_back((topic.to_owned(), payload.to_vec()));
        }

        Ok(())
    }

    fn process_once(&mut self, handler: &mut MessageHandler<'_>) -> Result<()> {
        // messages published from inside the handler wait for the next round
        let pending = self.inbound.len();

        for _ in 0..pending {
            let Some((topic, payload)) = self.inbound.pop_front() else {
                break;
            };

            if self.is_subscribed(&topic) {
                handler(&topic, &payload);
            }
        }

        Ok(())
    }
}
