//! Per-request upload pipeline.
//!
//! An upload moves through the states of [State]: the body is received and its upload
//! located, its content is staged while being hashed, and the staged file is published.
//! Any failure moves it to [State::Aborted], after which nothing attributable to the
//! request remains in the storage root.
use std::io::Read;
use std::path::{
    Path,
    PathBuf,
};
use std::time::Instant;

use serde_json::Value;

use log::{debug, info, error};

use crate::digest::{
    Accumulator,
    DigestAlgorithm,
};
use crate::error::IngestError;
use crate::publish::{
    publish,
    final_name,
};
use crate::source::{
    BodyKind,
    BodySource,
    Counted,
};
use crate::stage::stage;
use crate::trace::{
    hrsize,
    LogObserver,
    Observer,
    Report,
};


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Receiving,
    Staging,
    Publishing,
    Done,
    Aborted,
}

/// An incoming upload, independent of the HTTP layer it arrived through.
pub struct Upload<R> {
    pub content_type: Option<String>,
    /// Filename suggested outside of the body.
    pub filename: Option<String>,
    /// Declared body length, if any.
    pub expected_size: Option<u64>,
    /// Description of the remote end, for logging.
    pub client: String,
    pub body: R,
}

/// A published upload.
#[derive(Debug, Clone)]
pub struct Receipt {
    /// Sanitized original filename.
    pub filename: String,
    /// Published name, `<digest>_<filename>`.
    pub name: String,
    pub digest: String,
    pub size: u64,
    pub path: PathBuf,
    pub metadata: Option<Value>,
}

/// Ingests uploads into one storage root.
pub struct Ingester {
    root: PathBuf,
    algorithm: DigestAlgorithm,
    observer: Box<dyn Observer>,
}

struct Tracker<'a> {
    client: &'a str,
    state: State,
}

impl<'a> Tracker<'a> {
    fn enter(&mut self, state: State) {
        debug!("upload from {}: {:?} -> {:?}", self.client, self.state, state);
        self.state = state;
    }
}

impl Ingester {
    /// `root` must exist. It is shared by every upload, and staging files are created in
    /// it too.
    pub fn new(root: PathBuf) -> Ingester {
        Ingester {
            root,
            algorithm: DigestAlgorithm::default(),
            observer: Box::new(LogObserver),
        }
    }

    pub fn with_algorithm(mut self, algorithm: DigestAlgorithm) -> Ingester {
        self.algorithm = algorithm;
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn Observer>) -> Ingester {
        self.observer = observer;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Run one upload to completion, and report its outcome to the observer.
    pub fn ingest<R: Read>(&self, upload: Upload<R>) -> Result<Receipt, IngestError> {
        let started = Instant::now();
        let client = upload.client.clone();
        let mut tracker = Tracker {
            client: &client,
            state: State::Receiving,
        };
        let r = self.run(upload, &mut tracker);
        match &r {
            Ok(_) => {
                tracker.enter(State::Done);
            },
            Err(e) => {
                error!("upload from {} aborted while {:?}: {:?}", &client, tracker.state, e);
                tracker.enter(State::Aborted);
            },
        };
        let report = Report {
            client: &client,
            elapsed: started.elapsed(),
            result: &r,
        };
        self.observer.observe(&report);
        r
    }

    fn run<R: Read>(&self, upload: Upload<R>, tracker: &mut Tracker<'_>) -> Result<Receipt, IngestError> {
        debug!("incoming upload from {}", upload.client);
        let kind = BodyKind::from_content_type(upload.content_type.as_deref())?;
        let body = Counted::new(upload.body, upload.expected_size);
        let source = BodySource::new(kind, body, upload.filename.as_deref());

        let root = self.root.as_path();
        let algorithm = self.algorithm;
        let sourced = source.consume(|unit| {
            tracker.enter(State::Staging);
            debug!("hashing data and streaming {} to disk...", unit.filename);
            let mut h = Accumulator::new(algorithm);
            let staged = stage(root, unit.stream, &mut h)?;
            Ok((staged, h.finalize()))
        })?;
        let (staged, digest) = sourced.v;

        info!("received {} [{}] from {}", &sourced.filename, hrsize(staged.size), &upload.client);
        debug!("{}: {}", algorithm, &digest);

        tracker.enter(State::Publishing);
        let size = staged.size;
        let path = publish(staged, root, &digest, &sourced.filename)?;

        Ok(Receipt {
            name: final_name(&digest, &sourced.filename),
            filename: sourced.filename,
            digest,
            size,
            path,
            metadata: sourced.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs::{
        read,
        read_dir,
    };
    use std::io;
    use std::io::Read;
    use std::path::Path;
    use std::sync::{
        Arc,
        Mutex,
    };
    use std::thread;

    use serde_json::json;
    use tempfile::tempdir;

    use crate::digest::{
        Accumulator,
        DigestAlgorithm,
    };
    use crate::error::IngestErrorType;
    use crate::source::tests::{
        BOUNDARY,
        form_body,
        form_content_type,
    };
    use crate::stage::{
        is_staging_name,
        list_published,
    };
    use crate::trace::{
        Observer,
        Report,
    };

    use super::{
        Ingester,
        Upload,
    };

    fn raw<'a>(body: &'a [u8], filename: Option<&str>) -> Upload<&'a [u8]> {
        Upload {
            content_type: Some(String::from("application/octet-stream")),
            filename: filename.map(|v| v.to_string()),
            expected_size: Some(body.len() as u64),
            client: String::from("test (127.0.0.1:1)"),
            body,
        }
    }

    fn form(body: &[u8]) -> Upload<&[u8]> {
        Upload {
            content_type: Some(form_content_type()),
            filename: None,
            expected_size: Some(body.len() as u64),
            client: String::from("test (127.0.0.1:1)"),
            body,
        }
    }

    fn entries(p: &Path) -> usize {
        read_dir(p).unwrap().count()
    }

    fn rehash(p: &Path) -> String {
        let mut h = Accumulator::new(DigestAlgorithm::Sha1);
        h.update(&read(p).unwrap());
        h.finalize()
    }

    /// Sends `limit` bytes, then fails like a dropped connection.
    struct Dropout {
        limit: usize,
        sent: usize,
    }

    impl Read for Dropout {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.sent >= self.limit {
                return Err(io::Error::new(io::ErrorKind::ConnectionAborted, "client disconnected"));
            }
            let n = buf.len().min(self.limit - self.sent).min(512);
            self.sent += n;
            Ok(n)
        }
    }

    #[test]
    fn test_raw_hello_world() {
        let d = tempdir().unwrap();
        let ingester = Ingester::new(d.path().to_path_buf());
        let r = ingester.ingest(raw(b"hello world", None)).unwrap();
        assert_eq!(r.name, "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed_upload.dat");
        assert_eq!(r.size, 11);
        assert_eq!(r.filename, "upload.dat");
        assert_eq!(read(d.path().join(&r.name)).unwrap(), b"hello world");
        assert_eq!(list_published(d.path()).unwrap(), vec!(r.name.clone()));
        assert_eq!(entries(d.path()), 1);
    }

    #[test]
    fn test_raw_sha256() {
        let d = tempdir().unwrap();
        let ingester = Ingester::new(d.path().to_path_buf()).with_algorithm(DigestAlgorithm::Sha256);
        let r = ingester.ingest(raw(b"foo", Some("foo.txt"))).unwrap();
        assert_eq!(r.name, "2c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae_foo.txt");
    }

    #[test]
    fn test_roundtrip_digest() {
        let d = tempdir().unwrap();
        let ingester = Ingester::new(d.path().to_path_buf());
        let data: Vec<u8> = (0..3_000_000u32).map(|v| (v % 241) as u8).collect();
        let r = ingester.ingest(raw(&data, Some("big.bin"))).unwrap();
        assert_eq!(r.size, data.len() as u64);
        assert_eq!(rehash(&r.path), r.digest);
        assert!(r.name.starts_with(&r.digest));
    }

    #[test]
    fn test_multipart_report() {
        let d = tempdir().unwrap();
        let ingester = Ingester::new(d.path().to_path_buf());
        let body = form_body(&[
            ("file", Some("report.pdf"), "foo"),
            ("metadata", None, "{\"a\":1}"),
        ]);
        let r = ingester.ingest(form(&body)).unwrap();
        assert_eq!(r.name, "0beec7b5ea3f0fdbc95d0dd47f3c5bc275da8a33_report.pdf");
        assert_eq!(r.metadata.unwrap(), json!({"a": 1}));
        assert_eq!(list_published(d.path()).unwrap(), vec!(r.name));
        assert_eq!(entries(d.path()), 1);
    }

    #[test]
    fn test_multipart_missing_file() {
        let d = tempdir().unwrap();
        let ingester = Ingester::new(d.path().to_path_buf());
        let body = form_body(&[
            ("other", None, "foo"),
        ]);
        let e = ingester.ingest(form(&body)).err().unwrap();
        assert_eq!(e.typ, IngestErrorType::ClientError);
        assert_eq!(entries(d.path()), 0);
    }

    #[test]
    fn test_multipart_bad_metadata() {
        let d = tempdir().unwrap();
        let ingester = Ingester::new(d.path().to_path_buf());

        let body = form_body(&[
            ("metadata", None, "not-json"),
            ("file", Some("a.txt"), "foo"),
        ]);
        let e = ingester.ingest(form(&body)).err().unwrap();
        assert_eq!(e.typ, IngestErrorType::ClientError);
        assert_eq!(e.to_string(), "non-JSON value in \"metadata\" parameter");
        assert_eq!(entries(d.path()), 0);

        let body = form_body(&[
            ("file", Some("a.txt"), "foo"),
            ("metadata", None, "not-json"),
        ]);
        let e = ingester.ingest(form(&body)).err().unwrap();
        assert_eq!(e.typ, IngestErrorType::ClientError);
        assert_eq!(entries(d.path()), 0);
    }

    #[test]
    fn test_truncated_body() {
        let d = tempdir().unwrap();
        let ingester = Ingester::new(d.path().to_path_buf());
        let mut upload = raw(b"only forty bytes of a hundred byte body.", None);
        upload.expected_size = Some(100);
        let e = ingester.ingest(upload).err().unwrap();
        assert_eq!(e.typ, IngestErrorType::StreamError);
        assert_eq!(entries(d.path()), 0);
    }

    #[test]
    fn test_malformed_multipart() {
        let d = tempdir().unwrap();
        let ingester = Ingester::new(d.path().to_path_buf());

        let e = ingester.ingest(form(b"--not-the-boundary\r\nrandom bytes\r\n")).err().unwrap();
        assert_eq!(e.typ, IngestErrorType::ClientError);
        assert_eq!(entries(d.path()), 0);

        let mut body = form_body(&[
            ("metadata", None, "{}"),
            ("file", Some("a.txt"), "some file content"),
        ]);
        let closing = format!("--{}--\r\n", BOUNDARY);
        body.truncate(body.len() - closing.len());
        let e = ingester.ingest(form(&body)).err().unwrap();
        assert_eq!(e.typ, IngestErrorType::ClientError);
        assert_eq!(e.to_string(), "malformed multipart/form-data body");
        assert_eq!(entries(d.path()), 0);
    }

    #[test]
    fn test_truncated_multipart() {
        let d = tempdir().unwrap();
        let ingester = Ingester::new(d.path().to_path_buf());
        let full = form_body(&[
            ("file", Some("a.txt"), "0123456789abcdef0123456789abcdef"),
        ]);
        let mut upload = form(&full[..full.len() - 30]);
        upload.expected_size = Some(full.len() as u64);
        let e = ingester.ingest(upload).err().unwrap();
        assert_eq!(e.typ, IngestErrorType::StreamError);
        assert_eq!(entries(d.path()), 0);
    }

    #[test]
    fn test_disconnect() {
        let d = tempdir().unwrap();
        let ingester = Ingester::new(d.path().to_path_buf());
        let upload = Upload {
            content_type: None,
            filename: Some(String::from("x.bin")),
            expected_size: Some(10_000),
            client: String::from("test"),
            body: Dropout {
                limit: 4_000,
                sent: 0,
            },
        };
        let e = ingester.ingest(upload).err().unwrap();
        assert_eq!(e.typ, IngestErrorType::StreamError);
        assert!(!e.to_string().contains(d.path().to_str().unwrap()));
        assert_eq!(entries(d.path()), 0);
    }

    #[test]
    fn test_concurrent_same_upload() {
        let d = tempdir().unwrap();
        let ingester = Arc::new(Ingester::new(d.path().to_path_buf()));
        let data: Vec<u8> = (0..200_000u32).map(|v| (v % 199) as u8).collect();
        let data = Arc::new(data);

        let mut threads = vec!();
        for _ in 0..8 {
            let ingester = ingester.clone();
            let data = data.clone();
            threads.push(thread::spawn(move || {
                ingester.ingest(raw(&data, Some("same.bin"))).unwrap()
            }));
        }
        let mut names = vec!();
        for t in threads {
            names.push(t.join().unwrap().name);
        }
        names.dedup();
        assert_eq!(names.len(), 1);

        let published = list_published(d.path()).unwrap();
        assert_eq!(published, names);
        for entry in read_dir(d.path()).unwrap() {
            let name = entry.unwrap().file_name().to_string_lossy().into_owned();
            assert!(!is_staging_name(&name));
        }
        assert_eq!(rehash(&d.path().join(&published[0])), published[0][..40]);
    }

    #[test]
    fn test_distinct_concurrent_uploads() {
        let d = tempdir().unwrap();
        let ingester = Arc::new(Ingester::new(d.path().to_path_buf()));
        let mut threads = vec!();
        for i in 0..6u8 {
            let ingester = ingester.clone();
            threads.push(thread::spawn(move || {
                let data = vec![i; 70_000];
                ingester.ingest(raw(&data, Some("same.bin"))).unwrap()
            }));
        }
        for t in threads {
            t.join().unwrap();
        }
        let published = list_published(d.path()).unwrap();
        assert_eq!(published.len(), 6);
        assert_eq!(entries(d.path()), 6);
        for name in published.iter() {
            assert!(name.ends_with("_same.bin"));
            assert_eq!(rehash(&d.path().join(name)), name[..40]);
        }
    }

    struct Collect {
        v: Arc<Mutex<Vec<bool>>>,
    }

    impl Observer for Collect {
        fn observe(&self, report: &Report<'_>) {
            self.v.lock().unwrap().push(report.result.is_ok());
        }
    }

    #[test]
    fn test_observer_called() {
        let d = tempdir().unwrap();
        let seen = Arc::new(Mutex::new(vec!()));
        let ingester = Ingester::new(d.path().to_path_buf()).with_observer(Box::new(Collect {
            v: seen.clone(),
        }));
        ingester.ingest(raw(b"foo", None)).unwrap();
        let body = form_body(&[]);
        ingester.ingest(form(&body)).err().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!(true, false));
    }
}
