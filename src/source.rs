//! Turns a request body into the single upload it carries.
//!
//! Two body shapes are accepted:
//!
//! * _raw_: any content type other than `multipart/form-data`. The whole body is the file
//!   content. The filename is the hint given with the request, or [DEFAULT_FILENAME].
//! * _multipart_: `multipart/form-data`. The field named `file` is the file content, and
//!   its declared filename takes precedence over the hint. An optional `metadata` field
//!   must contain JSON. It is logged and handed back, but never stored. All other fields
//!   are skipped.
//!
//! Multipart bodies are parsed as they arrive. The content of the `file` field is handed
//! to the consumer as a reader positioned inside the body, so it is never held in memory.
//!
//! A `metadata` field placed before `file` is validated before the consumer is invoked.
//! One placed after `file` can only be validated after the consumer has run; its result
//! is dropped in that case, which for staged content means the staging file is removed.
use std::io::{
    self,
    ErrorKind,
    Read,
};
use std::str::FromStr;

use mime::Mime;
use multipart::server::Multipart;
use serde_json::Value;

use log::{debug, info, warn};

use crate::error::{
    IngestError,
    IngestErrorType,
};

/// Filename used when the request does not provide a usable one.
pub const DEFAULT_FILENAME: &str = "upload.dat";

/// Largest accepted `metadata` field.
pub const METADATA_LIMIT: u64 = 64 * 1024;

/// Reduce a client supplied filename to a bare base name safe to join onto a directory.
///
/// Both `/` and `\` count as separators. Control characters are dropped. Names that end
/// up empty, `.` or `..` are replaced by [DEFAULT_FILENAME].
pub fn sanitize_filename(name: &str) -> String {
    sanitize_or(name, DEFAULT_FILENAME)
}

/// As [sanitize_filename], but with `fallback` standing in for names that reduce to nothing.
pub fn sanitize_or(name: &str, fallback: &str) -> String {
    let base = match name.rsplit(|c| c == '/' || c == '\\').next() {
        Some(v) => v,
        None => "",
    };
    let clean: String = base.chars().filter(|c| !c.is_control()).collect();
    match clean.as_str() {
        "" | "." | ".." => fallback.to_string(),
        _ => clean,
    }
}

/// Shape of a request body, derived from its content type.
#[derive(Debug, PartialEq, Eq)]
pub enum BodyKind {
    Raw,
    Multipart(String),
}

impl BodyKind {
    /// Only `multipart/form-data` is parsed as a form. Anything else, including an
    /// unparseable or absent content type, is a raw body.
    pub fn from_content_type(content_type: Option<&str>) -> Result<BodyKind, IngestError> {
        let s = match content_type {
            Some(v) => v,
            None => {
                return Ok(BodyKind::Raw);
            },
        };
        let m = match Mime::from_str(s) {
            Ok(v) => v,
            Err(e) => {
                debug!("unparseable content type {:?} treated as raw: {}", s, e);
                return Ok(BodyKind::Raw);
            },
        };
        if m.type_() != mime::MULTIPART || m.subtype() != mime::FORM_DATA {
            return Ok(BodyKind::Raw);
        }
        match m.get_param(mime::BOUNDARY) {
            Some(v) => {
                let boundary = v.as_str().trim_matches('"');
                if boundary.len() == 0 {
                    return Err(IngestError::client("multipart/form-data boundary is empty"));
                }
                Ok(BodyKind::Multipart(boundary.to_string()))
            },
            None => Err(IngestError::client("multipart/form-data without boundary")),
        }
    }
}

/// The one upload a request body carries, as handed to the consumer.
pub struct UploadUnit<'a> {
    pub filename: &'a str,
    pub metadata: Option<&'a Value>,
    pub stream: &'a mut dyn Read,
}

/// What is left of a request body after the consumer has run.
#[derive(Debug)]
pub struct Sourced<T> {
    pub filename: String,
    pub metadata: Option<Value>,
    pub v: T,
}

/// Request body wrapper reporting a premature end as an error.
///
/// With an expected length, the body ending early means the client went away. The read
/// that would report the end fails with [ErrorKind::ConnectionAborted] instead, which
/// keeps it apart from the form parser's own [ErrorKind::UnexpectedEof].
pub struct Counted<R> {
    inner: R,
    expected: Option<u64>,
    seen: u64,
}

impl<R: Read> Counted<R> {
    pub fn new(inner: R, expected: Option<u64>) -> Counted<R> {
        Counted {
            inner,
            expected,
            seen: 0,
        }
    }

    pub fn seen(&self) -> u64 {
        self.seen
    }
}

impl<R: Read> Read for Counted<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 && buf.len() > 0 {
            if let Some(expected) = self.expected {
                if self.seen < expected {
                    let msg = format!("request body ended after {} of {} bytes", self.seen, expected);
                    return Err(io::Error::new(ErrorKind::ConnectionAborted, msg));
                }
            }
        }
        self.seen += n as u64;
        Ok(n)
    }
}

/// A request body, ready to yield its upload.
pub struct BodySource<R> {
    kind: BodyKind,
    body: R,
    hint: Option<String>,
}

impl<R: Read> BodySource<R> {
    /// `hint` is the filename suggested outside of the body, e.g. in the request path.
    pub fn new(kind: BodyKind, body: R, hint: Option<&str>) -> BodySource<R> {
        BodySource {
            kind,
            body,
            hint: hint.map(|v| v.to_string()),
        }
    }

    fn fallback_filename(&self) -> String {
        match &self.hint {
            Some(v) => sanitize_filename(v),
            None => DEFAULT_FILENAME.to_string(),
        }
    }

    /// Hand the upload in the body to `consumer` and return what it produced.
    ///
    /// The consumer is invoked at most once. It is not invoked at all when the body is
    /// rejected before the file content is reached.
    pub fn consume<T, F>(self, consumer: F) -> Result<Sourced<T>, IngestError>
    where F: FnOnce(UploadUnit<'_>) -> Result<T, IngestError> {
        let is_form = matches!(self.kind, BodyKind::Multipart(_));
        if is_form {
            self.consume_multipart(consumer)
        } else {
            self.consume_raw(consumer)
        }
    }

    fn consume_raw<T, F>(mut self, consumer: F) -> Result<Sourced<T>, IngestError>
    where F: FnOnce(UploadUnit<'_>) -> Result<T, IngestError> {
        let filename = self.fallback_filename();
        let unit = UploadUnit {
            filename: &filename,
            metadata: None,
            stream: &mut self.body,
        };
        let v = consumer(unit)?;
        Ok(Sourced {
            filename,
            metadata: None,
            v,
        })
    }

    fn consume_multipart<T, F>(self, consumer: F) -> Result<Sourced<T>, IngestError>
    where F: FnOnce(UploadUnit<'_>) -> Result<T, IngestError> {
        let fallback = self.fallback_filename();
        let boundary = match self.kind {
            BodyKind::Multipart(v) => v,
            BodyKind::Raw => {
                return Err(IngestError::internal(io::Error::new(ErrorKind::Other, "raw body in multipart parser")));
            },
        };
        let mut form = Multipart::with_body(self.body, boundary);

        let mut consumer = Some(consumer);
        let mut filename: Option<String> = None;
        let mut metadata: Option<Value> = None;
        let mut r: Option<T> = None;

        loop {
            let mut field = match form.read_entry() {
                Ok(Some(v)) => v,
                Ok(None) => {
                    break;
                },
                Err(e) => {
                    return Err(multipart_error(e));
                },
            };
            let name = field.headers.name.to_string();
            match name.as_str() {
                "file" => {
                    let f = match consumer.take() {
                        Some(v) => v,
                        None => {
                            return Err(IngestError::client("multipart/form-data must contain exactly one \"file\" field"));
                        },
                    };
                    let declared = match &field.headers.filename {
                        Some(v) => sanitize_or(v, &fallback),
                        None => fallback.clone(),
                    };
                    debug!("file field declares filename {:?}", &field.headers.filename);
                    let unit = UploadUnit {
                        filename: &declared,
                        metadata: metadata.as_ref(),
                        stream: &mut field.data,
                    };
                    r = match f(unit) {
                        Ok(v) => Some(v),
                        Err(e) => {
                            return Err(reclassify(e));
                        },
                    };
                    filename = Some(declared);
                },
                "metadata" => {
                    if metadata.is_some() {
                        return Err(IngestError::client("multipart/form-data must contain at most one \"metadata\" field"));
                    }
                    metadata = Some(read_metadata(&mut field.data)?);
                },
                _ => {
                    debug!("ignoring multipart field {:?}", name);
                },
            }
        }

        match r {
            Some(v) => {
                Ok(Sourced {
                    filename: filename.unwrap_or(fallback),
                    metadata,
                    v,
                })
            },
            None => Err(IngestError::client("multipart/form-data must contain a \"file\" field")),
        }
    }
}

// The parser reports a body ending before the closing boundary as UnexpectedEof.
// Truncation by the client surfaces from Counted as ConnectionAborted.
fn multipart_error(e: io::Error) -> IngestError {
    match e.kind() {
        ErrorKind::InvalidData | ErrorKind::InvalidInput | ErrorKind::UnexpectedEof => {
            warn!("malformed multipart body: {}", e);
            IngestError::client("malformed multipart/form-data body")
        },
        _ => IngestError::stream(e),
    }
}

// Parser failures hit while the consumer drains the file field come back as stream errors.
fn reclassify(e: IngestError) -> IngestError {
    match (e.typ, e.io_kind()) {
        (IngestErrorType::StreamError, Some(ErrorKind::InvalidData))
        | (IngestErrorType::StreamError, Some(ErrorKind::InvalidInput))
        | (IngestErrorType::StreamError, Some(ErrorKind::UnexpectedEof)) => {
            warn!("malformed multipart body in file field: {:?}", e);
            IngestError::client("malformed multipart/form-data body")
        },
        _ => e,
    }
}

fn read_metadata(mut f: impl Read) -> Result<Value, IngestError> {
    let mut buf: Vec<u8> = vec!();
    match f.by_ref().take(METADATA_LIMIT + 1).read_to_end(&mut buf) {
        Ok(_) => {},
        Err(e) => {
            return Err(multipart_error(e));
        },
    };
    if buf.len() as u64 > METADATA_LIMIT {
        return Err(IngestError::client("\"metadata\" parameter too large"));
    }
    match serde_json::from_slice::<Value>(&buf) {
        Ok(v) => {
            info!("metadata: {}", v);
            Ok(v)
        },
        Err(e) => {
            debug!("metadata rejected: {}", e);
            Err(IngestError::client("non-JSON value in \"metadata\" parameter"))
        },
    }
}
