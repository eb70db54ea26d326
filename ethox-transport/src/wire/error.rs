use core::fmt;

/// The error type for parsing and emitting transport headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A buffer was shorter than the header it should contain.
    ///
    /// The buffer may be shorter than the minimum length of the header, or a length field of the
    /// header points beyond the end of the available data.
    Truncated,

    /// A packet had an incorrect checksum.
    WrongChecksum,

    /// A packet could not be recognized.
    ///
    /// E.g. an address of an unknown family.
    Unrecognized,

    /// A packet was recognized but was self-contradictory.
    ///
    /// Examples: a TCP header whose data offset is smaller than the fixed header; a UDP header
    /// claiming to contain less than 8 bytes of data; an option with an impossible length.
    Malformed,
}

/// The result type of the wire module.
pub type Result<T> = core::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Truncated     => write!(f, "truncated packet"),
            Error::WrongChecksum => write!(f, "checksum error"),
            Error::Unrecognized  => write!(f, "unrecognized packet"),
            Error::Malformed     => write!(f, "malformed packet"),
        }
    }
}

impl std::error::Error for Error {}
