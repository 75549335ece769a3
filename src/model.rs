//! Schema/codec: the domain entities and their wire representation.

use thiserror::Error;

pub type SourceId = u64;
pub type DestinationId = u64;

/// State of an edge, or of the source it belongs to. Total order matches the
/// stable wire id (§6.1): `Normal < Removed < Archived < Negative`, used to
/// break precedence ties at equal `updated_at` (invariant 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum State {
    Normal = 0,
    Removed = 1,
    Archived = 2,
    Negative = 3,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("unrecognized state wire id `{0}`")]
    UnknownState(u8),
}

impl State {
    pub const ALL: [State; 4] = [State::Normal, State::Removed, State::Archived, State::Negative];

    pub fn wire_id(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for State {
    type Error = ModelError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(State::Normal),
            1 => Ok(State::Removed),
            2 => Ok(State::Archived),
            3 => Ok(State::Negative),
            other => Err(ModelError::UnknownState(other)),
        }
    }
}

impl From<State> for u8 {
    fn from(state: State) -> Self {
        state.wire_id()
    }
}

/// A directed, labeled edge `source -> destination`, uniquely identified by
/// `(source_id, destination_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub source_id: SourceId,
    pub destination_id: DestinationId,
    /// Client-supplied ordering key. Unique within `(source_id, state)`.
    pub position: i64,
    pub updated_at: u32,
    pub count: u8,
    pub state: State,
}

impl Edge {
    pub fn new(
        source_id: SourceId,
        destination_id: DestinationId,
        position: i64,
        updated_at: u32,
        state: State,
    ) -> Self {
        Self {
            source_id,
            destination_id,
            position,
            updated_at,
            count: 1,
            state,
        }
    }

    /// `(updated_at, state)` treated as the monotonic order edges never move
    /// backward in (invariant 4).
    pub(crate) fn order_key(&self) -> (u32, State) {
        (self.updated_at, self.state)
    }
}

/// Per-source aggregate: the state currently attributed to the source as a
/// whole, and how many of its edges currently share that state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub source_id: SourceId,
    pub count: i32,
    pub state: State,
    pub updated_at: u32,
}

impl Metadata {
    pub fn default_for(source_id: SourceId, count: i32) -> Self {
        Self {
            source_id,
            count,
            state: State::Normal,
            updated_at: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_precedence_matches_wire_id() {
        assert!(State::Normal < State::Removed);
        assert!(State::Removed < State::Archived);
        assert!(State::Archived < State::Negative);
        for state in State::ALL {
            assert_eq!(State::try_from(state.wire_id()).unwrap(), state);
        }
    }

    #[test]
    fn unknown_wire_id_is_rejected() {
        assert_eq!(State::try_from(4), Err(ModelError::UnknownState(4)));
    }
}
