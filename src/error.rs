use std::error::Error;
use std::fmt;
use std::io;

/// Classifies a failed upload by who caused it.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum IngestErrorType {
    /// Malformed input from the client. Nothing was published.
    ClientError,
    /// The request body could not be read to the end.
    StreamError,
    /// The storage root could not be written or renamed into.
    StorageError,
    InternalError,
}

/// Error returned by every stage of the ingest pipeline.
///
/// `v` carries the client-facing detail. It is only set for
/// [IngestErrorType::ClientError]; all other types present a generic message and keep
/// the underlying cause available through [Error::source].
pub struct IngestError {
    pub typ: IngestErrorType,
    pub v: Option<String>,
    cause: Option<io::Error>,
}

impl IngestError {
    pub fn client(detail: &str) -> IngestError {
        IngestError {
            typ: IngestErrorType::ClientError,
            v: Some(detail.to_string()),
            cause: None,
        }
    }

    pub fn stream(e: io::Error) -> IngestError {
        IngestError {
            typ: IngestErrorType::StreamError,
            v: None,
            cause: Some(e),
        }
    }

    pub fn storage(e: io::Error) -> IngestError {
        IngestError {
            typ: IngestErrorType::StorageError,
            v: None,
            cause: Some(e),
        }
    }

    pub fn internal(e: io::Error) -> IngestError {
        IngestError {
            typ: IngestErrorType::InternalError,
            v: None,
            cause: Some(e),
        }
    }

    /// Whether the client, rather than the server, is to blame.
    pub fn is_client(&self) -> bool {
        self.typ == IngestErrorType::ClientError
    }

    /// Kind of the underlying I/O failure, if any.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        self.cause.as_ref().map(|e| e.kind())
    }

    /// Message safe to show to the remote end. Never contains local paths.
    pub fn public_message(&self) -> &str {
        match self.typ {
            IngestErrorType::ClientError => {
                match &self.v {
                    Some(v) => v.as_str(),
                    None => "bad request",
                }
            },
            IngestErrorType::StreamError => "upload interrupted before the body was complete",
            _ => "upload could not be stored",
        }
    }
}

impl fmt::Display for IngestError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.public_message())
    }
}

impl fmt::Debug for IngestError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(e) => write!(fmt, "{:?}: {}", self.typ, e),
            None => write!(fmt, "{:?}: {}", self.typ, self.public_message()),
        }
    }
}

impl Error for IngestError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            Some(e) => Some(e),
            None => None,
        }
    }
}
