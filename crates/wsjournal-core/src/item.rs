// ABOUTME: Defines the Item journal record and the Action variants it carries.
// ABOUTME: Encodes each Item as one newline-free JSON line and decodes lines back, flagging corrupt ones.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by the line codec.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A journal line that cannot be turned back into an Item.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Raised when a record carries an action code outside the known set.
#[derive(Debug, Error)]
#[error("unknown action code {0}")]
pub struct UnknownAction(pub u8);

/// The mutation a journal record describes. Reads are never journaled, so
/// there is no Get variant. On disk an action is its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Action {
    Push,
    Set,
    Pop,
}

impl Action {
    pub fn code(self) -> u8 {
        match self {
            Action::Push => 0,
            Action::Set => 1,
            Action::Pop => 2,
        }
    }
}

impl From<Action> for u8 {
    fn from(action: Action) -> Self {
        action.code()
    }
}

impl TryFrom<u8> for Action {
    type Error = UnknownAction;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Action::Push),
            1 => Ok(Action::Set),
            2 => Ok(Action::Pop),
            other => Err(UnknownAction(other)),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Push => "PUSH",
            Action::Set => "SET",
            Action::Pop => "POP",
        };
        f.write_str(name)
    }
}

/// One journal record. `seq` increases strictly over the life of a
/// collection and is what snapshots use as their cut point; `timestamp` is
/// kept for audit only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename = "Seq", default)]
    pub seq: u64,
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value", default)]
    pub value: String,
    #[serde(rename = "Action")]
    pub action: Action,
    #[serde(rename = "Timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl Item {
    pub fn new(
        seq: u64,
        action: Action,
        key: impl Into<String>,
        value: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            seq,
            key: key.into(),
            value: value.into(),
            action,
            timestamp,
        }
    }
}

/// Encode an Item as a single JSON line without the trailing newline.
/// serde_json escapes control characters inside strings, so the result
/// never contains a raw newline.
pub fn encode(item: &Item) -> Result<String, CodecError> {
    if item.key.is_empty() {
        return Err(CodecError::Corrupt("empty key".to_string()));
    }
    Ok(serde_json::to_string(item)?)
}

/// Decode one journal line. Any failure is reported as `Corrupt` so the
/// replay engine can decide whether to skip the line or give up.
pub fn decode(line: &str) -> Result<Item, CodecError> {
    let item: Item =
        serde_json::from_str(line.trim_end()).map_err(|e| CodecError::Corrupt(e.to_string()))?;
    if item.key.is_empty() {
        return Err(CodecError::Corrupt("empty key".to_string()));
    }
    Ok(item)
}
