use core::{fmt::Display, ops::Deref};

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TetherString(CompactString);

impl TetherString {
    pub const fn const_new(s: &'static str) -> Self {
        Self(CompactString::const_new(s))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Deref for TetherString {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.0.as_str()
    }
}

impl<T: AsRef<str>> From<T> for TetherString {
    fn from(value: T) -> Self {
        TetherString(CompactString::from(value.as_ref()))
    }
}

impl<T: AsRef<str> + ?Sized> PartialEq<T> for TetherString {
    fn eq(&self, other: &T) -> bool {
        self.0.as_str() == other.as_ref()
    }
}

impl Display for TetherString {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.0.fmt(f)
    }
}

/// Literal MQTT topic name.
///
/// Matching is plain string equality; wildcards only have meaning when
/// passed to a subscription.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicName(pub TetherString);

impl TopicName {
    /// Multi-level wildcard, matches every topic on the broker.
    pub const WILDCARD: Self = TopicName(TetherString::const_new("#"));

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, topic: &str) -> bool {
        self.0 == topic
    }
}

impl<T: AsRef<str>> From<T> for TopicName {
    fn from(value: T) -> Self {
        TopicName(TetherString::from(value))
    }
}

impl Deref for TopicName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl Display for TopicName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}
