//! Crate-wide fatal error type.
//!
//! Only the fatal kinds of the error design (setup, open, per-event source errors,
//! dumper write errors) are represented here as `Result::Err` values. The non-fatal
//! kinds (parser anomalies, OS lookup failures, a snaplen change on a file source) never
//! construct an `Error` — they are logged via [`crate::log`] and counted in
//! [`crate::stats::CaptureStats`] instead, per the propagation policy.

use std::io;
use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Bad configuration, or a second call to a single-shot setter.
    #[error("setup error: {0}")]
    Setup(String),

    /// The driver is unavailable, or a trace file could not be opened.
    #[error("open error: {path:?}: {source}")]
    Open {
        path: Option<PathBuf>,
        #[source]
        source: io::Error,
    },

    /// A per-event error from the `Source`, other than Timeout/Eof.
    #[error("source error: {0}")]
    Source(String),

    /// A write failure from the dumper.
    #[error("dumper write error: {0}")]
    Write(#[from] io::Error),

    /// A single-shot configuration setter was called twice.
    #[error("{0} was already set and cannot be changed")]
    AlreadySet(&'static str),

    /// A pre-open-only setter was called after the source was opened.
    #[error("{0} can only be set before open()")]
    AlreadyOpened(&'static str),

    /// The event source is not open.
    #[error("operation requires an open source")]
    NotOpen,
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_are_human_readable() {
        let e = Error::AlreadySet("filter");
        assert_eq!(
            e.to_string(),
            "filter was already set and cannot be changed"
        );
    }
}
