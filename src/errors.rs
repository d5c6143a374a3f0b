use std::error::Error;
use std::fmt;
use std::io;
use std::num::ParseIntError;

/// Types of errors that can occur during privilege dropping operations
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// System-level error when interacting with OS privileges
    SysError,
    /// No entry in the user database matches the requested name
    UnknownAccount,
    /// A user database line does not fit in the reader's line buffer
    LineTooLong,
    /// A matching user database line does not have exactly 7 fields
    MalformedRecord,
    /// A uid or gid is not a valid decimal integer
    InvalidId,
    /// The kernel reported an unusable highest capability number
    InvalidCapability,
    /// Some capabilities could not be removed from the bounding set
    PartialBoundingSet,
}

/// Internal representation of privilege dropping errors
#[derive(Debug)]
enum ErrorRepr {
    /// Error from the nix crate
    FromNix(nix::Error),
    /// Error from a std I/O operation
    FromIo(io::Error),
    /// Malformed numeric id
    FromParse(ParseIntError),
    /// Error with a static description
    WithDescription(ErrorKind, &'static str),
    /// Error with a formatted description
    WithDetail(ErrorKind, String),
}

/// Error type for privilege dropping operations
#[derive(Debug)]
pub struct PrivDropError {
    repr: ErrorRepr,
}

impl PrivDropError {
    /// The category of this error
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::FromNix(_) | ErrorRepr::FromIo(_) => ErrorKind::SysError,
            ErrorRepr::FromParse(_) => ErrorKind::InvalidId,
            ErrorRepr::WithDescription(kind, _) | ErrorRepr::WithDetail(kind, _) => kind,
        }
    }

    /// The underlying errno, if this error came from a system call
    pub fn errno(&self) -> Option<nix::errno::Errno> {
        match self.repr {
            ErrorRepr::FromNix(e) => Some(e),
            ErrorRepr::FromIo(ref e) => e.raw_os_error().map(nix::errno::Errno::from_i32),
            _ => None,
        }
    }

    pub(crate) fn detail<T: Into<String>>(kind: ErrorKind, detail: T) -> PrivDropError {
        PrivDropError {
            repr: ErrorRepr::WithDetail(kind, detail.into()),
        }
    }
}

impl Error for PrivDropError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self.repr {
            ErrorRepr::FromNix(ref e) => Some(e),
            ErrorRepr::FromIo(ref e) => Some(e),
            ErrorRepr::FromParse(ref e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for PrivDropError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self.repr {
            ErrorRepr::FromNix(ref e) => write!(f, "Privilege drop error: {}", e),
            ErrorRepr::FromIo(ref e) => write!(f, "Privilege drop error: {}", e),
            ErrorRepr::FromParse(ref e) => write!(f, "Privilege drop error: invalid id: {}", e),
            ErrorRepr::WithDescription(_, description) => {
                write!(f, "Privilege drop error: {}", description)
            }
            ErrorRepr::WithDetail(_, ref detail) => write!(f, "Privilege drop error: {}", detail),
        }
    }
}

impl From<nix::Error> for PrivDropError {
    fn from(e: nix::Error) -> PrivDropError {
        PrivDropError {
            repr: ErrorRepr::FromNix(e),
        }
    }
}

impl From<io::Error> for PrivDropError {
    fn from(e: io::Error) -> PrivDropError {
        PrivDropError {
            repr: ErrorRepr::FromIo(e),
        }
    }
}

impl From<ParseIntError> for PrivDropError {
    fn from(e: ParseIntError) -> PrivDropError {
        PrivDropError {
            repr: ErrorRepr::FromParse(e),
        }
    }
}

impl From<(ErrorKind, &'static str)> for PrivDropError {
    fn from((kind, description): (ErrorKind, &'static str)) -> PrivDropError {
        PrivDropError {
            repr: ErrorRepr::WithDescription(kind, description),
        }
    }
}
