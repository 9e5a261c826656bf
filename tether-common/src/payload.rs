//! Payload vocabulary shared between the engine and its configuration.

use core::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::TetherString;

/// A pair of literals used to encode a boolean as a plain payload.
///
/// Devices often disagree with each other (`ON`/`OFF`, `1`/`0`, `open`/`closed`),
/// and some even use one pair for reporting state and another for accepting
/// commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnOffPayload {
    pub on: TetherString,
    pub off: TetherString,
}

impl OnOffPayload {
    pub const DEFAULT: Self = Self {
        on: TetherString::const_new("on"),
        off: TetherString::const_new("off"),
    };

    pub fn new(on: impl Into<TetherString>, off: impl Into<TetherString>) -> Self {
        Self { on: on.into(), off: off.into() }
    }

    /// Literal for the given value.
    pub fn encode(&self, value: bool) -> &str {
        if value { self.on.as_str() } else { self.off.as_str() }
    }

    /// Exact, case-sensitive match against either literal.
    pub fn decode(&self, payload: &str) -> Option<bool> {
        if self.on == payload {
            Some(true)
        } else if self.off == payload {
            Some(false)
        } else {
            None
        }
    }
}

impl Default for OnOffPayload {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Scalar kind of a synchronized variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    String,
}

impl Display for ValueKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::String => "string",
        })
    }
}
