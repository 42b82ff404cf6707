//! Partial/final lifecycle for streamed schema-shaped payloads.
//!
//! The same lifecycle is applied to tool arguments and to structured
//! response segments: while the provider is still streaming, the payload is
//! decoded leniently into the partial projection; once it reports completion
//! the payload is decoded strictly.

use std::fmt;

use crate::value::{Generable, ValueError, parse_final, parse_partial};

/// Decoded state of a streamed payload.
#[derive(Clone, PartialEq)]
pub enum Phase<T: Generable> {
    Partial(T::Partial),
    Final(T),
}

impl<T: Generable> Phase<T> {
    pub fn is_final(&self) -> bool {
        matches!(self, Phase::Final(_))
    }

    /// The partial projection, degrading a final value so consumers see a
    /// stable shape across the whole stream.
    pub fn current(&self) -> T::Partial {
        match self {
            Phase::Partial(partial) => partial.clone(),
            Phase::Final(value) => value.to_partial(),
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Phase::Final(value) => Some(value),
            Phase::Partial(_) => None,
        }
    }
}

impl<T: Generable> fmt::Debug for Phase<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Partial(partial) => f.debug_tuple("Partial").field(partial).finish(),
            Phase::Final(value) => f.debug_tuple("Final").field(value).finish(),
        }
    }
}

/// A streamed payload together with its raw bytes.
///
/// `phase` is `None` when the payload is not decodable under either rule;
/// callers render that as pending. Equality is defined by `(id, raw)` only,
/// so re-emitted snapshots with the same bytes compare equal across phase
/// transitions.
#[derive(Clone)]
pub struct Streamed<T: Generable> {
    pub id: String,
    pub raw: String,
    pub phase: Option<Phase<T>>,
}

impl<T: Generable> Streamed<T> {
    /// Decodes `raw`, strictly when `complete`, leniently otherwise.
    ///
    /// A complete payload that fails strict decoding still gets a partial
    /// phase when its prefix decodes.
    pub fn decode(id: impl Into<String>, raw: impl Into<String>, complete: bool) -> Self {
        let raw = raw.into();
        let phase = if complete {
            match parse_final::<T>(&raw) {
                Ok(value) => Some(Phase::Final(value)),
                Err(_) => parse_partial::<T>(&raw).ok().map(Phase::Partial),
            }
        } else {
            parse_partial::<T>(&raw).ok().map(Phase::Partial)
        };
        Self {
            id: id.into(),
            raw,
            phase,
        }
    }

    /// Decodes a payload the provider reported as complete, failing when the
    /// strict rule does not hold.
    pub fn decode_final(id: impl Into<String>, raw: impl Into<String>) -> Result<Self, ValueError> {
        let raw = raw.into();
        let value = parse_final::<T>(&raw)?;
        Ok(Self {
            id: id.into(),
            raw,
            phase: Some(Phase::Final(value)),
        })
    }

    pub fn current(&self) -> Option<T::Partial> {
        self.phase.as_ref().map(Phase::current)
    }

    pub fn is_final(&self) -> bool {
        self.phase.as_ref().is_some_and(Phase::is_final)
    }

    pub fn value(&self) -> Option<&T> {
        self.phase.as_ref().and_then(Phase::value)
    }

    pub fn is_pending(&self) -> bool {
        self.phase.is_none()
    }
}

impl<T: Generable> PartialEq for Streamed<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.raw == other.raw
    }
}

impl<T: Generable> fmt::Debug for Streamed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Streamed")
            .field("id", &self.id)
            .field("raw", &self.raw)
            .field("phase", &self.phase)
            .finish()
    }
}
