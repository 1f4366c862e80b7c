#![forbid(unsafe_code)]

//! Three-state snapshot of an asynchronous source.

/// Latest known state of a stream or eventual.
///
/// - `Pending` carries the seed value supplied by the caller (or carried over
///   from a superseded source) until the first event arrives.
/// - `Data` wraps the latest emitted value.
/// - `Error` wraps the latest error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AsyncSnapshot<T, E> {
    /// No event received yet.
    Pending(Option<T>),
    /// Latest emitted value.
    Data(T),
    /// Latest error.
    Error(E),
}

impl<T, E> AsyncSnapshot<T, E> {
    /// Pending snapshot seeded with `seed`.
    #[must_use]
    pub fn pending(seed: Option<T>) -> Self {
        Self::Pending(seed)
    }

    /// Snapshot for a settled result.
    #[must_use]
    pub fn from_result(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::Data(value),
            Err(error) => Self::Error(error),
        }
    }

    /// The value carried by this snapshot, seed included.
    #[must_use]
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Pending(seed) => seed.as_ref(),
            Self::Data(value) => Some(value),
            Self::Error(_) => None,
        }
    }

    /// Consume the snapshot, keeping its value.
    #[must_use]
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Pending(seed) => seed,
            Self::Data(value) => Some(value),
            Self::Error(_) => None,
        }
    }

    /// The error, if this is an error snapshot.
    #[must_use]
    pub fn error(&self) -> Option<&E> {
        match self {
            Self::Error(error) => Some(error),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    #[must_use]
    pub fn has_data(&self) -> bool {
        matches!(self, Self::Data(_))
    }

    #[must_use]
    pub fn has_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

impl<T, E> Default for AsyncSnapshot<T, E> {
    fn default() -> Self {
        Self::Pending(None)
    }
}
