#![forbid(unsafe_code)]

//! Error taxonomy for the watch runtime.
//!
//! | Variant | Class | Recoverable |
//! |---------|-------|-------------|
//! | `DuplicateWatch` | contract violation | no, fix the component |
//! | `PositionalMismatch` | contract violation | no, fix the component |
//! | `PassShrank` | contract violation (strict mode only) | no |
//! | `Unmounted` | lifecycle misuse | no |
//! | `Resolution` | resolver failure, passed through unchanged | host decides |
//!
//! Stream and eventual errors are not here: they are values inside
//! [`AsyncSnapshot`](fwatch_core::AsyncSnapshot).

use fwatch_core::ResolutionError;

use crate::entry::EntryKind;

pub type Result<T> = std::result::Result<T, WatchError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WatchError {
    #[error(
        "{object} is already watched at slot {existing}; watch an object once per component (handlers may repeat)"
    )]
    DuplicateWatch { object: String, existing: usize },

    #[error(
        "slot {slot} holds a {found} entry but this call declares a {expected}; watch calls must run in the same order on every render"
    )]
    PositionalMismatch {
        slot: usize,
        expected: String,
        found: String,
    },

    #[error("render pass declared {declared} entries but the watch list holds {held}")]
    PassShrank { declared: usize, held: usize },

    #[error("binding state used after the component was unmounted")]
    Unmounted,

    #[error(transparent)]
    Resolution(#[from] ResolutionError),
}

impl WatchError {
    pub(crate) fn mismatch(
        slot: usize,
        expected: EntryKind,
        expected_type: &str,
        found: EntryKind,
        found_type: &str,
    ) -> Self {
        Self::PositionalMismatch {
            slot,
            expected: format!("{expected}<{expected_type}>"),
            found: format!("{found}<{found_type}>"),
        }
    }

    /// Whether this is a programming-contract violation.
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::DuplicateWatch { .. } | Self::PositionalMismatch { .. } | Self::PassShrank { .. }
        )
    }
}
