use serde_json::Value;
use tether_common::TopicName;

use crate::{
    AlwaysConnected, Clock, Connectivity, Error, MonotonicClock, Result, Transport,
    registry::Registry, variables::Variables,
};

/// Inbound state is ignored for this long (ms) after a property was synchronized.
///
/// A device usually echoes a command back on its state topic. Within the
/// window that echo, or any stale report sent before the device processed the
/// command, must not override the value that was just written.
pub const DEBOUNCE_WINDOW: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    /// Waiting for connectivity before the transport is started.
    AwaitingTransport,
    Running,
    /// Transport bring-up failed. Nothing happens anymore.
    Failed,
}

/// What happened to the properties matching one inbound message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteReport {
    /// Properties whose state topic matched.
    pub matched: usize,
    /// Properties whose backing variable was written.
    pub applied: usize,
    /// Properties that rejected the payload (unknown literal, wrong JSON kind, missing field).
    pub ignored: usize,
    /// Properties synchronized less than [`DEBOUNCE_WINDOW`] ago.
    pub debounced: usize,
    /// Properties with a local write that has not been published yet.
    pub pending: usize,
    /// Properties expecting a JSON field from a payload that is not JSON.
    pub malformed: usize,
}

/// Keeps a [`Registry`] of properties in sync over a [`Transport`].
///
/// There is normally one gateway per process, owned by the main loop, which
/// calls [`tick`](Self::tick) repeatedly with the application's variables.
pub struct Gateway<T, N = AlwaysConnected, C = MonotonicClock> {
    registry: Registry,
    transport: T,
    connectivity: N,
    clock: C,
    state: GatewayState,
}

impl<T: Transport, N: Connectivity, C: Clock> Gateway<T, N, C> {
    pub fn new(transport: T, connectivity: N, clock: C) -> Self {
        Self::with_registry(Registry::new(), transport, connectivity, clock)
    }

    pub fn with_registry(registry: Registry, transport: T, connectivity: N, clock: C) -> Self {
        Self {
            registry,
            transport,
            connectivity,
            clock,
            state: GatewayState::AwaitingTransport,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn state(&self) -> GatewayState {
        self.state
    }

    /// Run one round of the reconciliation loop.
    ///
    /// Until connectivity is reported this does nothing. The first connected
    /// tick starts the transport and subscribes to every topic; if that fails
    /// the error is returned wrapped in [`Error::Startup`] and every later call
    /// returns [`Error::Halted`].
    ///
    /// A running tick lets the transport deliver inbound messages (see
    /// [`on_message`](Self::on_message)), then publishes a command for every
    /// property whose variable changed since it was last synchronized.
    pub fn tick(&mut self, vars: &mut Variables) -> Result<GatewayState> {
        match self.state {
            GatewayState::Failed => return Err(Error::Halted),
            GatewayState::AwaitingTransport => {
                if !self.connectivity.is_connected() {
                    return Ok(GatewayState::AwaitingTransport);
                }

                if let Err(e) = self.bring_up() {
                    tracing::error!("Transport bring-up failed: {e}");
                    self.state = GatewayState::Failed;
                    return Err(Error::Startup(Box::new(e)));
                }

                self.state = GatewayState::Running;
            }
            GatewayState::Running => {}
        }

        let registry = &mut self.registry;
        let clock = &self.clock;
        self.transport.process_once(&mut |topic, payload| {
            route(registry, vars, clock.now_millis(), topic, payload);
        })?;

        self.publish_changes(vars);

        Ok(GatewayState::Running)
    }

    /// Apply an inbound message to every property listening on `topic`.
    pub fn on_message(&mut self, vars: &mut Variables, topic: &str, payload: &[u8]) -> RouteReport {
        let now = self.clock.now_millis();
        route(&mut self.registry, vars, now, topic, payload)
    }

    fn bring_up(&mut self) -> Result<()> {
        tracing::info!(properties = self.registry.len(), "Starting transport");

        self.transport.start()?;
        self.transport.subscribe(TopicName::WILDCARD.as_str())?;

        Ok(())
    }

    fn publish_changes(&mut self, vars: &Variables) {
        let now = self.clock.now_millis();

        for property in self.registry.iter_mut() {
            if !property.has_changed(vars) {
                continue;
            }

            if let Some(topic) = property.command_topic() {
                let payload = property.encode_command(vars);

                tracing::debug!(
                    property = property.name(vars),
                    %topic,
                    %payload,
                    "Publishing command",
                );

                if let Err(e) = self.transport.publish(topic, payload.as_bytes()) {
                    tracing::warn!(%topic, "Failed to publish command: {e}");
                }
            }

            // marked even without a command topic, so the write is not seen again
            property.mark_seen(vars, now);
        }
    }
}

fn route(
    registry: &mut Registry,
    vars: &mut Variables,
    now: u64,
    topic: &str,
    payload: &[u8],
) -> RouteReport {
    tracing::debug!(%topic, payload = %String::from_utf8_lossy(payload), "Received message");

    let mut report = RouteReport::default();

    // parsed on first use, then shared by every property reading a field
    let mut document: Option<Result<Value, serde_json::Error>> = None;

    for property in registry.subscribed_to(topic) {
        report.matched += 1;

        if property.is_debounced(now, DEBOUNCE_WINDOW) {
            tracing::trace!(property = property.name(vars), "Inside debounce window, skipping");
            report.debounced += 1;
            continue;
        }

        if property.has_changed(vars) {
            tracing::trace!(property = property.name(vars), "Local write not published yet, skipping");
            report.pending += 1;
            continue;
        }

        let applied = match property.json_field() {
            Some(field) => {
                let document = document.get_or_insert_with(|| {
                    let parsed = serde_json::from_slice::<Value>(payload);
                    if let Err(e) = &parsed {
                        tracing::warn!(%topic, "Failed to parse JSON payload: {e}");
                    }
                    parsed
                });

                let Ok(document) = document else {
                    report.malformed += 1;
                    continue;
                };

                match document.get(field) {
                    Some(value) => property.decode_structured(vars, value, now),
                    None => {
                        tracing::debug!(%topic, field, "JSON payload has no such field");
                        false
                    }
                }
            }
            None => property.decode_plain(vars, payload, now),
        };

        if applied {
            tracing::debug!(property = property.name(vars), "Updated from device state");
            report.applied += 1;
        } else {
            report.ignored += 1;
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc};

    use super::*;
    use crate::{ManualClock, MemoryTransport};

    type TestGateway = Gateway<MemoryTransport, AlwaysConnected, ManualClock>;

    fn gateway() -> (TestGateway, ManualClock) {
        let clock = ManualClock::new(0);
        (Gateway::new(MemoryTransport::new(), AlwaysConnected, clock.clone()), clock)
    }

    fn published(gateway: &TestGateway) -> Vec<(&str, &str)> {
        gateway
            .transport()
            .published()
            .iter()
            .map(|(topic, payload)| (topic.as_str(), core::str::from_utf8(payload).unwrap()))
            .collect()
    }

    #[test]
    fn cloud_write_wins_over_echo() {
        let (mut gateway, clock) = gateway();
        let mut vars = Variables::new();
        let lamp = vars.add("lamp", false);
        gateway.registry_mut().add(lamp).state_topic("A").command_topic("B");

        vars[lamp] = true;

        clock.set(1);
        gateway.tick(&mut vars).unwrap();
        assert_eq!(published(&gateway), [("B", "on")]);

        clock.set(100);
        gateway.transport_mut().inject("A", "off");
        gateway.tick(&mut vars).unwrap();
        assert_eq!(vars[lamp], true);

        clock.set(600);
        gateway.transport_mut().inject("A", "off");
        gateway.tick(&mut vars).unwrap();
        assert_eq!(vars[lamp], false);

        // applying device state is a synchronization, not a change to publish
        clock.set(700);
        gateway.tick(&mut vars).unwrap();
        assert_eq!(published(&gateway), [("B", "on")]);
    }

    #[test]
    fn debounce_covers_the_whole_window() {
        let mut vars = Variables::new();
        let level = vars.add("level", 0);

        for offset in [0, 1, 250, 499] {
            let (mut gateway, clock) = gateway();
            gateway.registry_mut().add(level).state_topic("L").command_topic("L/set");

            clock.set(1000);
            vars[level] = 5;
            gateway.tick(&mut vars).unwrap();

            clock.set(1000 + offset);
            let report = gateway.on_message(&mut vars, "L", b"9");
            assert_eq!(report.debounced, 1, "offset {offset}");
            assert_eq!(vars[level], 5, "offset {offset}");
        }

        let (mut gateway, clock) = gateway();
        gateway.registry_mut().add(level).state_topic("L").command_topic("L/set");
        clock.set(1000);
        vars[level] = 6;
        gateway.tick(&mut vars).unwrap();

        clock.set(1500);
        let report = gateway.on_message(&mut vars, "L", b"9");
        assert_eq!(report.applied, 1);
        assert_eq!(vars[level], 9);
    }

    #[test]
    fn unpublished_write_wins_over_device_state() {
        let (mut gateway, clock) = gateway();
        let mut vars = Variables::new();
        let lamp = vars.add("lamp", false);
        gateway.registry_mut().add(lamp).state_topic("A").command_topic("B");

        clock.set(5000);
        vars[lamp] = true;
        let report = gateway.on_message(&mut vars, "A", b"off");

        assert_eq!(report.pending, 1);
        assert_eq!(vars[lamp], true);

        gateway.tick(&mut vars).unwrap();
        assert_eq!(published(&gateway), [("B", "on")]);
    }

    #[test]
    fn change_detection_is_idempotent() {
        let (mut gateway, clock) = gateway();
        let mut vars = Variables::new();
        let mode = vars.add("mode", String::new());
        gateway.registry_mut().add(mode).command_topic("hvac/mode/set");

        vars[mode] = "heat".to_owned();
        clock.set(10);
        gateway.tick(&mut vars).unwrap();

        let property = gateway.registry().get(0).unwrap();
        assert!(!property.has_changed(&vars));
        assert_eq!(property.last_seen_at(), Some(10));

        clock.set(20);
        gateway.tick(&mut vars).unwrap();
        assert_eq!(published(&gateway), [("hvac/mode/set", "heat")]);
    }

    #[test]
    fn receive_only_property_marks_changes_seen() {
        let (mut gateway, clock) = gateway();
        let mut vars = Variables::new();
        let temp = vars.add("temp", 0.0f32);
        gateway.registry_mut().add(temp).state_topic("sensor/temp");

        vars[temp] = 19.5;
        clock.set(1);
        gateway.tick(&mut vars).unwrap();

        assert!(gateway.transport().published().is_empty());
        assert!(!gateway.registry().get(0).unwrap().has_changed(&vars));
        assert_eq!(gateway.registry().get(0).unwrap().last_seen_at(), Some(1));
    }

    #[test]
    fn plain_and_json_properties_share_a_topic() {
        let (mut gateway, clock) = gateway();
        let mut vars = Variables::new();
        let raw = vars.add("raw", String::new());
        let power = vars.add("power", 0.0f32);
        let on = vars.add("on", false);
        gateway.registry_mut().add(raw).state_topic("plug");
        gateway.registry_mut().add(power).state_topic("plug").json_field("power");
        gateway.registry_mut().add(on).state_topic("plug").json_field("state");

        clock.set(1000);
        let payload = br#"{"power": 12.5, "state": "on"}"#;
        let report = gateway.on_message(&mut vars, "plug", payload);

        assert_eq!(report, RouteReport { matched: 3, applied: 3, ..RouteReport::default() });
        assert_eq!(vars[raw], r#"{"power": 12.5, "state": "on"}"#);
        assert_eq!(vars[power], 12.5);
        assert_eq!(vars[on], true);
    }

    #[test]
    fn malformed_json_only_skips_json_properties() {
        let (mut gateway, clock) = gateway();
        let mut vars = Variables::new();
        let count = vars.add("count", 0);
        let power = vars.add("power", 0.0f32);
        let on = vars.add("on", false);
        gateway.registry_mut().add(power).state_topic("C").json_field("power");
        gateway.registry_mut().add(count).state_topic("C");
        gateway.registry_mut().add(on).state_topic("C").json_field("state");

        clock.set(1000);
        let report = gateway.on_message(&mut vars, "C", b"42abc");

        assert_eq!(report.matched, 3);
        assert_eq!(report.malformed, 2);
        assert_eq!(report.applied, 1);
        assert_eq!(vars[count], 42);
        assert_eq!(vars[power], 0.0);
    }

    #[test]
    fn missing_field_and_wrong_kind_are_ignored() {
        let (mut gateway, clock) = gateway();
        let mut vars = Variables::new();
        let level = vars.add("level", 3);
        let name = vars.add("name", "x".to_owned());
        gateway.registry_mut().add(level).state_topic("dev").json_field("level");
        gateway.registry_mut().add(name).state_topic("dev").json_field("name");

        // mark both as synchronized with their initial values
        clock.set(0);
        gateway.tick(&mut vars).unwrap();

        clock.set(1000);
        let report = gateway.on_message(&mut vars, "dev", br#"{"level": "high"}"#);

        assert_eq!(report.ignored, 2);
        assert_eq!(vars[level], 3);
        assert_eq!(vars[name], "x");
    }

    #[test]
    fn nan_state_does_not_start_a_publish_loop() {
        let (mut gateway, clock) = gateway();
        let mut vars = Variables::new();
        let temp = vars.add("temp", 0.0f32);
        gateway.registry_mut().add(temp).state_topic("t").command_topic("t/set");

        clock.set(1000);
        gateway.transport_mut().inject("t", "nan");
        gateway.tick(&mut vars).unwrap();

        for now in [1100, 1200, 1300, 1400] {
            clock.set(now);
            gateway.tick(&mut vars).unwrap();
        }

        assert!(gateway.transport().published().is_empty());
        assert_eq!(vars[temp], 0.0);

        clock.set(10_000);
        let report = gateway.on_message(&mut vars, "t", b"21.5");
        assert_eq!(report, RouteReport { matched: 1, applied: 1, ..RouteReport::default() });
        assert_eq!(vars[temp], 21.5);
    }

    #[test]
    fn non_object_json_is_a_missing_field() {
        let (mut gateway, clock) = gateway();
        let mut vars = Variables::new();
        let level = vars.add("level", 0);
        let raw = vars.add("raw", 0);
        gateway.registry_mut().add(level).state_topic("dev").json_field("level");
        gateway.registry_mut().add(raw).state_topic("dev");

        clock.set(1000);
        for payload in [&b"42"[..], b"[1, 2]", b"\"level\"", b"null"] {
            let report = gateway.on_message(&mut vars, "dev", payload);

            assert_eq!(report.matched, 2);
            assert_eq!(report.malformed, 0);
            assert_eq!(report.ignored, 1);
            assert_eq!(vars[level], 0);
            clock.advance(1000);
        }

        assert_eq!(vars[raw], 0);
    }

    #[test]
    fn int_prefix_parse_does_not_block_others() {
        let (mut gateway, clock) = gateway();
        let mut vars = Variables::new();
        let first = vars.add("first", 0);
        let second = vars.add("second", false);
        gateway.registry_mut().add(first).state_topic("C");
        gateway.registry_mut().add(second).state_topic("C");

        clock.set(10);
        gateway.transport_mut().inject("C", "42abc");
        gateway.tick(&mut vars).unwrap();

        assert_eq!(vars[first], 42);
        assert_eq!(vars[second], false);
    }

    #[test]
    fn own_command_echo_on_shared_topic_is_debounced() {
        let (mut gateway, clock) = gateway();
        let mut vars = Variables::new();
        let level = vars.add("level", 0);
        gateway.registry_mut().add(level).state_topic("dimmer").command_topic("dimmer");

        vars[level] = 80;
        clock.set(1);
        gateway.tick(&mut vars).unwrap();

        // the broker loops the command back on the next tick
        clock.set(30);
        gateway.tick(&mut vars).unwrap();
        clock.set(60);
        gateway.tick(&mut vars).unwrap();

        assert_eq!(vars[level], 80);
        assert_eq!(published(&gateway), [("dimmer", "80")]);
    }

    #[test]
    fn unrelated_topics_are_ignored() {
        let (mut gateway, _clock) = gateway();
        let mut vars = Variables::new();
        let lamp = vars.add("lamp", false);
        gateway.registry_mut().add(lamp).state_topic("lamp/state");

        assert_eq!(gateway.on_message(&mut vars, "lamp", b"on"), RouteReport::default());
        assert_eq!(gateway.on_message(&mut vars, "lamp/state/x", b"on"), RouteReport::default());
        assert_eq!(vars[lamp], false);
    }

    #[test]
    fn waits_for_connectivity_then_starts_once() {
        let online = Rc::new(Cell::new(false));
        let clock = ManualClock::new(0);
        let mut gateway = Gateway::new(MemoryTransport::new(), {
            let online = online.clone();
            move || online.get()
        }, clock);
        let mut vars = Variables::new();
        let lamp = vars.add("lamp", true);
        gateway.registry_mut().add(lamp).command_topic("lamp/set");

        assert_eq!(gateway.tick(&mut vars).unwrap(), GatewayState::AwaitingTransport);
        assert_eq!(gateway.tick(&mut vars).unwrap(), GatewayState::AwaitingTransport);
        assert_eq!(gateway.transport().start_count(), 0);
        assert!(gateway.transport().published().is_empty());

        online.set(true);
        assert_eq!(gateway.tick(&mut vars).unwrap(), GatewayState::Running);

        // running is terminal, even if connectivity drops again
        online.set(false);
        assert_eq!(gateway.tick(&mut vars).unwrap(), GatewayState::Running);

        assert_eq!(gateway.transport().start_count(), 1);
        assert_eq!(gateway.transport().subscriptions(), ["#"]);
        assert_eq!(gateway.transport().published().len(), 1);
    }

    #[test]
    fn failed_bring_up_halts() {
        let mut gateway = Gateway::new(
            MemoryTransport::failing("mdns responder"),
            AlwaysConnected,
            ManualClock::new(0),
        );
        let mut vars = Variables::new();
        let lamp = vars.add("lamp", true);
        gateway.registry_mut().add(lamp).command_topic("lamp/set");

        assert!(matches!(gateway.tick(&mut vars), Err(Error::Startup(_))));
        assert_eq!(gateway.state(), GatewayState::Failed);

        assert!(matches!(gateway.tick(&mut vars), Err(Error::Halted)));
        assert_eq!(gateway.transport().start_count(), 1);
        assert!(gateway.transport().published().is_empty());
    }
}
