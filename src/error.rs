//! Error type shared by every fallible entry point of the crate.
//!
//! Only constructors and I/O paths return errors. Once a sketch is built,
//! the in-memory operations (`get`, `set`, `inc`, `add`, `clear`, `filter`,
//! `swap`) cannot fail and return plain values.

use core::fmt;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure raised by sketch construction, persistence, or a combinator
/// whose operands do not line up.
#[derive(Debug)]
pub enum Error {
    /// A caller-supplied argument failed a documented check. The payload
    /// names the check that tripped.
    InvalidArgument(&'static str),
    /// An OS call failed. `op` names the syscall-level operation.
    Io {
        op: &'static str,
        source: std::io::Error,
    },
    /// A file did not parse as a sketch: wrong magic, or header fields
    /// inconsistent with each other or with the file length.
    CorruptFile(&'static str),
    /// A requested flag combination is not honored on this platform.
    Unsupported(&'static str),
}

impl Error {
    /// Stable lowercase tag for the error category, independent of the
    /// human-readable message.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Error::InvalidArgument(_) => "invalid-argument",
            Error::Io { .. } => "io-failure",
            Error::CorruptFile(_) => "corrupt-file",
            Error::Unsupported(_) => "unsupported",
        }
    }

    pub(crate) fn io(op: &'static str, source: std::io::Error) -> Error {
        Error::Io { op, source }
    }

    pub(crate) fn errno(op: &'static str, errno: nix::errno::Errno) -> Error {
        Error::Io {
            op,
            source: std::io::Error::from_raw_os_error(errno as i32),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(what) => write!(f, "invalid argument: {what}"),
            Error::Io { op, source } => write!(f, "{op} failed: {source}"),
            Error::CorruptFile(what) => write!(f, "corrupt sketch file: {what}"),
            Error::Unsupported(what) => write!(f, "unsupported on this platform: {what}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_failed_check() {
        let err = Error::InvalidArgument("width out of range");
        assert_eq!(err.to_string(), "invalid argument: width out of range");
        assert_eq!(err.kind_name(), "invalid-argument");
    }

    #[test]
    fn io_errors_keep_their_source() {
        let err = Error::io(
            "mmap",
            std::io::Error::from_raw_os_error(libc::ENOMEM),
        );
        assert_eq!(err.kind_name(), "io-failure");
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().starts_with("mmap failed"));
    }
}
