//! Transaction actions

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// What a transaction does to the replayed state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Action {
    /// Add the payload value (`+`)
    #[default]
    Add = b'+',
    /// Remove a previously added value (`-`)
    Remove = b'-',
    /// Clear all values (`*`)
    Clear = b'*',
}

impl Action {
    /// The single-byte wire tag
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn is_add(self) -> bool {
        self == Action::Add
    }

    pub fn is_remove(self) -> bool {
        self == Action::Remove
    }

    pub fn is_clear(self) -> bool {
        self == Action::Clear
    }
}

impl TryFrom<u8> for Action {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            b'+' => Ok(Action::Add),
            b'-' => Ok(Action::Remove),
            b'*' => Ok(Action::Clear),
            other => Err(CodecError::InvalidAction(other)),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_byte() as char)
    }
}
