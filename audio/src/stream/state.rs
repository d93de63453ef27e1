//! Stream lifecycle.

use std::fmt;

use crate::error::{Error, Result};

/// Lifecycle state of an encode or decode stream.
///
/// ```text
/// Created --data--> Active --flush()--> Flushing --end_stream()--> Closed
///    |                 |                                             ^
///    +-----------------+------------------end_stream()---------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    /// No data has been written yet.
    #[default]
    Created,
    /// Data is flowing.
    Active,
    /// `flush` was called; no more data is accepted.
    Flushing,
    /// The stream has ended.
    Closed,
}

impl StreamState {
    /// Returns true if data calls are accepted.
    pub fn accepts_data(self) -> bool {
        matches!(self, Self::Created | Self::Active)
    }

    /// Moves to `Active` on the first data call.
    pub(crate) fn activate(&mut self) -> Result<()> {
        if !self.accepts_data() {
            return Err(Error::StreamClosed);
        }
        *self = Self::Active;
        Ok(())
    }

    /// Moves to `Flushing`. A stream that never saw data flushes as if it
    /// had just become active.
    pub(crate) fn begin_flush(&mut self) -> Result<()> {
        if !self.accepts_data() {
            return Err(Error::StreamClosed);
        }
        *self = Self::Flushing;
        Ok(())
    }

    /// Moves to `Closed`. Returns the previous state.
    pub(crate) fn close(&mut self) -> StreamState {
        std::mem::replace(self, Self::Closed)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Active => write!(f, "active"),
            Self::Flushing => write!(f, "flushing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}
