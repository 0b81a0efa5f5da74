/// All errors that can occur while reading, writing or analysing GILDAS data.
#[derive(Debug)]
pub enum Error {
    /// Unrecognized encoding tag, bad magic bytes or an unknown enumerated code.
    Format(&'static str),
    /// A computed seek or read position lies beyond the end of the file.
    CorruptOffset {
        /// Logical record (spectrum index or cube plane) being read.
        record: usize,
        /// Byte offset that was requested.
        offset: u64,
        /// Length of the file in bytes.
        file_len: u64,
    },
    /// A scalar access fell outside the buffer handed to a codec.
    OutOfBounds {
        /// Byte offset of the access.
        offset: usize,
        /// Length of the buffer.
        len: usize,
    },
    /// A channel, plane or spectrum index outside the valid range.
    ChannelRange {
        /// Requested index.
        index: usize,
        /// Number of valid entries.
        len: usize,
    },
    /// A Gaussian fit could not be resolved or produced non-finite parameters.
    FitDivergence,
    /// A parameter required by the operation is absent from the table.
    MissingParameter(&'static str),
    /// A value is present but unusable (zero resolution, empty array...).
    InvalidValue(&'static str),
    /// The container or cube handle has been released.
    Closed,
    /// An I/O error from the standard library.
    Io(std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Format(what) => write!(f, "invalid GILDAS format: {what}"),
            Error::CorruptOffset {
                record,
                offset,
                file_len,
            } => write!(
                f,
                "corrupted file: record {record} needs offset {offset} but file has {file_len} bytes"
            ),
            Error::OutOfBounds { offset, len } => {
                write!(f, "offset {offset} out of bounds for buffer of {len} bytes")
            }
            Error::ChannelRange { index, len } => {
                write!(f, "index {index} out of range (valid: 0..{len})")
            }
            Error::FitDivergence => write!(f, "Gaussian fit did not converge"),
            Error::MissingParameter(key) => write!(f, "missing required parameter: {key}"),
            Error::InvalidValue(what) => write!(f, "invalid value: {what}"),
            Error::Closed => write!(f, "file handle already released"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_format() {
        let e = Error::Format("unknown encoding tag");
        assert_eq!(e.to_string(), "invalid GILDAS format: unknown encoding tag");
    }

    #[test]
    fn display_corrupt_offset_carries_context() {
        let e = Error::CorruptOffset {
            record: 7,
            offset: 4096,
            file_len: 2048,
        };
        let s = e.to_string();
        assert!(s.contains("record 7"));
        assert!(s.contains("4096"));
        assert!(s.contains("2048"));
    }

    #[test]
    fn display_channel_range() {
        let e = Error::ChannelRange { index: 70, len: 64 };
        assert_eq!(e.to_string(), "index 70 out of range (valid: 0..64)");
    }

    #[test]
    fn display_missing_parameter() {
        let e = Error::MissingParameter("REF_FREQ");
        assert_eq!(e.to_string(), "missing required parameter: REF_FREQ");
    }

    #[test]
    fn io_error_from_conversion() {
        let io_err = std::io::Error::other("oops");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
    }

    #[test]
    fn std_error_source() {
        use std::error::Error as StdError;

        let e = Error::FitDivergence;
        assert!(e.source().is_none());

        let e = Error::Io(std::io::Error::other("inner"));
        assert!(e.source().is_some());
    }
}
