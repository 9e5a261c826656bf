//! Properties bind a variable to a pair of MQTT topics.
//!
//! A [`Property`] carries the routing information (state topic, command topic,
//! optional JSON field) and the bookkeeping used to detect changes: the value it
//! last synchronized and when. The per-type payload rules live in the variants
//! wrapped by [`PropertyKind`].

use serde_json::Value;
use tether_common::{OnOffPayload, TetherString, TopicName, ValueKind};

use crate::variables::{Scalar, Var, Variables};

/// The backing variable and the value last synchronized with it.
#[derive(Debug, Clone)]
pub struct Binding<T> {
    pub(crate) var: Var<T>,
    pub(crate) last_seen: T,
}

impl<T: Scalar> Binding<T> {
    pub(crate) fn new(var: Var<T>) -> Self {
        Self { var, last_seen: T::default() }
    }

    pub fn var(&self) -> Var<T> {
        self.var
    }

    pub fn last_seen(&self) -> &T {
        &self.last_seen
    }
}

/// Payload rules for one scalar type.
pub trait Variant {
    type Value: Scalar;

    fn binding(&self) -> &Binding<Self::Value>;
    fn binding_mut(&mut self) -> &mut Binding<Self::Value>;

    /// Value encoded by a raw payload, or `None` if the payload should be ignored.
    fn parse_plain(&self, payload: &[u8]) -> Option<Self::Value>;

    /// Value held by a JSON field, or `None` if it has the wrong kind.
    fn parse_structured(&self, value: &Value) -> Option<Self::Value>;

    fn encode(&self, value: &Self::Value) -> String;
}

#[derive(Debug, Clone)]
pub struct BoolProperty {
    pub(crate) binding: Binding<bool>,
    pub(crate) state_payload: OnOffPayload,
    pub(crate) command_payload: OnOffPayload,
}

impl BoolProperty {
    pub fn state_payload(&self) -> &OnOffPayload {
        &self.state_payload
    }

    pub fn command_payload(&self) -> &OnOffPayload {
        &self.command_payload
    }
}

impl Variant for BoolProperty {
    type Value = bool;

    fn binding(&self) -> &Binding<bool> {
        &self.binding
    }

    fn binding_mut(&mut self) -> &mut Binding<bool> {
        &mut self.binding
    }

    fn parse_plain(&self, payload: &[u8]) -> Option<bool> {
        // devices may send auxiliary payloads on the state topic
        let value = self.state_payload.decode(&String::from_utf8_lossy(payload));

        if value.is_none() {
            tracing::debug!(
                payload = %String::from_utf8_lossy(payload),
                "Ignoring payload that matches neither state literal",
            );
        }

        value
    }

    fn parse_structured(&self, value: &Value) -> Option<bool> {
        match value {
            Value::Bool(b) => Some(*b),
            Value::String(s) => self.parse_plain(s.as_bytes()),
            _ => None,
        }
    }

    fn encode(&self, value: &bool) -> String {
        self.command_payload.encode(*value).to_owned()
    }
}

#[derive(Debug, Clone)]
pub struct IntProperty {
    pub(crate) binding: Binding<i32>,
}

impl Variant for IntProperty {
    type Value = i32;

    fn binding(&self) -> &Binding<i32> {
        &self.binding
    }

    fn binding_mut(&mut self) -> &mut Binding<i32> {
        &mut self.binding
    }

    fn parse_plain(&self, payload: &[u8]) -> Option<i32> {
        Some(parse_int_prefix(&String::from_utf8_lossy(payload)))
    }

    fn parse_structured(&self, value: &Value) -> Option<i32> {
        value.as_i64().and_then(|n| i32::try_from(n).ok())
    }

    fn encode(&self, value: &i32) -> String {
        value.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct FloatProperty {
    pub(crate) binding: Binding<f32>,
}

impl Variant for FloatProperty {
    type Value = f32;

    fn binding(&self) -> &Binding<f32> {
        &self.binding
    }

    fn binding_mut(&mut self) -> &mut Binding<f32> {
        &mut self.binding
    }

    fn parse_plain(&self, payload: &[u8]) -> Option<f32> {
        // NaN never compares equal to itself, so it would always read as changed
        Some(parse_float_prefix(&String::from_utf8_lossy(payload))).filter(|n| !n.is_nan())
    }

    fn parse_structured(&self, value: &Value) -> Option<f32> {
        value.as_f64().map(|n| n as f32).filter(|n| !n.is_nan())
    }

    fn encode(&self, value: &f32) -> String {
        value.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct StringProperty {
    pub(crate) binding: Binding<String>,
}

impl Variant for StringProperty {
    type Value = String;

    fn binding(&self) -> &Binding<String> {
        &self.binding
    }

    fn binding_mut(&mut self) -> &mut Binding<String> {
        &mut self.binding
    }

    fn parse_plain(&self, payload: &[u8]) -> Option<String> {
        Some(String::from_utf8_lossy(payload).into_owned())
    }

    fn parse_structured(&self, value: &Value) -> Option<String> {
        value.as_str().map(str::to_owned)
    }

    fn encode(&self, value: &String) -> String {
        value.clone()
    }
}

#[derive(Debug, Clone)]
pub enum PropertyKind {
    Bool(BoolProperty),
    Int(IntProperty),
    Float(FloatProperty),
    String(StringProperty),
}

impl From<Var<bool>> for PropertyKind {
    fn from(var: Var<bool>) -> Self {
        PropertyKind::Bool(BoolProperty {
            binding: Binding::new(var),
            state_payload: OnOffPayload::default(),
            command_payload: OnOffPayload::default(),
        })
    }
}

impl From<Var<i32>> for PropertyKind {
    fn from(var: Var<i32>) -> Self {
        PropertyKind::Int(IntProperty { binding: Binding::new(var) })
    }
}

impl From<Var<f32>> for PropertyKind {
    fn from(var: Var<f32>) -> Self {
        PropertyKind::Float(FloatProperty { binding: Binding::new(var) })
    }
}

impl From<Var<String>> for PropertyKind {
    fn from(var: Var<String>) -> Self {
        PropertyKind::String(StringProperty { binding: Binding::new(var) })
    }
}

macro_rules! with_variant {
    ($kind:expr, $v:ident => $body:expr) => {
        match $kind {
            PropertyKind::Bool($v) => $body,
            PropertyKind::Int($v) => $body,
            PropertyKind::Float($v) => $body,
            PropertyKind::String($v) => $body,
        }
    };
}

#[derive(Debug, Clone)]
pub struct Property {
    pub(crate) state_topic: Option<TopicName>,
    pub(crate) command_topic: Option<TopicName>,
    pub(crate) json_field: Option<TetherString>,
    pub(crate) last_seen_at: Option<u64>,
    pub(crate) kind: PropertyKind,
}

impl Property {
    pub(crate) fn new(kind: PropertyKind) -> Self {
        Self {
            state_topic: None,
            command_topic: None,
            json_field: None,
            last_seen_at: None,
            kind,
        }
    }

    pub fn state_topic(&self) -> Option<&TopicName> {
        self.state_topic.as_ref()
    }

    pub fn command_topic(&self) -> Option<&TopicName> {
        self.command_topic.as_ref()
    }

    pub fn json_field(&self) -> Option<&str> {
        self.json_field.as_deref()
    }

    /// When this property was last synchronized, if ever.
    pub fn last_seen_at(&self) -> Option<u64> {
        self.last_seen_at
    }

    pub fn kind(&self) -> &PropertyKind {
        &self.kind
    }

    pub fn value_kind(&self) -> ValueKind {
        match self.kind {
            PropertyKind::Bool(_) => ValueKind::Bool,
            PropertyKind::Int(_) => ValueKind::Int,
            PropertyKind::Float(_) => ValueKind::Float,
            PropertyKind::String(_) => ValueKind::String,
        }
    }

    /// Name of the backing variable.
    pub fn name<'v>(&self, vars: &'v Variables) -> &'v str {
        with_variant!(&self.kind, v => vars.name(v.binding().var))
    }

    /// Whether the backing variable differs from the last synchronized value.
    ///
    /// Floats compare exactly, so any drift counts as a change.
    pub fn has_changed(&self, vars: &Variables) -> bool {
        with_variant!(&self.kind, v => vars[v.binding().var] != v.binding().last_seen)
    }

    /// Whether a synchronization happened less than `window` ms before `now`.
    pub fn is_debounced(&self, now: u64, window: u64) -> bool {
        self.last_seen_at
            .is_some_and(|at| now.saturating_sub(at) < window)
    }

    /// Command payload for the current value of the backing variable.
    pub fn encode_command(&self, vars: &Variables) -> String {
        with_variant!(&self.kind, v => v.encode(&vars[v.binding().var]))
    }

    /// Snapshot the backing variable as synchronized at `now`.
    pub fn mark_seen(&mut self, vars: &Variables, now: u64) {
        with_variant!(&mut self.kind, v => {
            let binding = v.binding_mut();
            binding.last_seen = vars[binding.var].clone();
        });
        self.last_seen_at = Some(now);
    }

    /// Apply a raw payload. Returns whether the backing variable was written.
    pub fn decode_plain(&mut self, vars: &mut Variables, payload: &[u8], now: u64) -> bool {
        let applied = with_variant!(&mut self.kind, v => match v.parse_plain(payload) {
            Some(value) => {
                vars[v.binding().var] = value;
                true
            }
            None => false,
        });

        if applied {
            self.mark_seen(vars, now);
        }

        applied
    }

    /// Apply a decoded JSON value. Returns whether the backing variable was written.
    pub fn decode_structured(&mut self, vars: &mut Variables, value: &Value, now: u64) -> bool {
        let applied = with_variant!(&mut self.kind, v => match v.parse_structured(value) {
            Some(value) => {
                vars[v.binding().var] = value;
                true
            }
            None => false,
        });

        if applied {
            self.mark_seen(vars, now);
        } else {
            tracing::debug!(%value, "Ignoring JSON value of unexpected kind");
        }

        applied
    }
}

/// Leading integer of `s`, the way C's `atoi` reads it.
///
/// Leading whitespace and a sign are accepted, parsing stops at the first
/// non-digit and out-of-range values saturate. No digits at all yields 0.
pub fn parse_int_prefix(s: &str) -> i32 {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let mut acc: i64 = 0;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        acc = (acc * 10 + i64::from(b - b'0')).min(i64::from(i32::MAX) + 1);
    }

    let acc = if negative { -acc } else { acc };
    acc.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// Longest decimal prefix of `s`, the way C's `atof` reads it. Yields 0.0 if
/// nothing parses.
pub fn parse_float_prefix(s: &str) -> f32 {
    let s = s.trim_start();
    let bytes = s.as_bytes();

    let mut end = 0;
    if matches!(bytes.first(), Some(b'-' | b'+')) {
        end += 1;
    }

    let rest = &s[end..];
    for word in ["infinity", "inf", "nan"] {
        if rest.get(..word.len()).is_some_and(|p| p.eq_ignore_ascii_case(word)) {
            return s[..end + word.len()].parse().unwrap_or(0.0);
        }
    }

    let int_digits = count_digits(&bytes[end..]);
    end += int_digits;

    let mut frac_digits = 0;
    if bytes.get(end) == Some(&b'.') {
        frac_digits = count_digits(&bytes[end + 1..]);
        if int_digits > 0 || frac_digits > 0 {
            end += 1 + frac_digits;
        }
    }

    if int_digits == 0 && frac_digits == 0 {
        return 0.0;
    }

    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'-' | b'+')) {
            exp_end += 1;
        }
        let exp_digits = count_digits(&bytes[exp_end..]);
        if exp_digits > 0 {
            end = exp_end + exp_digits;
        }
    }

    s[..end].parse().unwrap_or(0.0)
}

fn count_digits(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|b| b.is_ascii_digit()).count()
}
