use percent_encoding::percent_decode_str;
use tiny_http::{
    Method,
    Request,
};
use url::Url;

use log::{debug, warn};

use crate::ingest::{
    Ingester,
    Upload,
};
use crate::response::{
    exec_response,
    exec_status,
    preflight_response,
};


/// Upload route a request URL resolves to.
#[derive(Debug, PartialEq, Eq)]
pub enum Route {
    /// `/upload`, or `/upload/{filename}` with the decoded filename.
    Upload(Option<String>),
    NotFound,
}

/// Resolve the request target of an incoming request.
///
/// The query string is ignored. A filename in the path is percent-decoded but not yet
/// sanitized.
pub fn route(target: &str) -> Route {
    let base = match Url::parse("http://localhost/") {
        Ok(v) => v,
        Err(_) => {
            return Route::NotFound;
        },
    };
    let url = match base.join(target) {
        Ok(v) => v,
        Err(e) => {
            debug!("unparseable request target {:?}: {}", target, e);
            return Route::NotFound;
        },
    };
    let segments: Vec<&str> = match url.path_segments() {
        Some(v) => v.collect(),
        None => {
            return Route::NotFound;
        },
    };
    match segments.as_slice() {
        ["upload"] | ["upload", ""] => Route::Upload(None),
        ["upload", name] => {
            match percent_decode_str(name).decode_utf8() {
                Ok(v) => Route::Upload(Some(v.into_owned())),
                Err(_) => Route::Upload(Some(percent_decode_str(name).decode_utf8_lossy().into_owned())),
            }
        },
        _ => Route::NotFound,
    }
}

/// Description of the remote end of `req`, for logging.
pub fn client_of(req: &Request) -> String {
    let mut agent = String::from("-");
    for h in req.headers() {
        if h.field.equiv("User-Agent") {
            agent = h.value.as_str().to_string();
        }
    }
    format!("{} ({})", agent, req.remote_addr())
}

fn content_type_of(req: &Request) -> Option<String> {
    for h in req.headers() {
        if h.field.equiv("Content-Type") {
            return Some(h.value.as_str().to_string());
        }
    }
    None
}

/// Answer a single request.
///
/// `PUT` and `POST` on an upload route ingest the request body. `GET /upload` answers a
/// short greeting, and `OPTIONS` a CORS preflight.
pub fn handle(mut req: Request, ingester: &Ingester) {
    let filename = match route(req.url()) {
        Route::Upload(v) => v,
        Route::NotFound => {
            debug!("no route for {} {}", req.method(), req.url());
            exec_status(req, 404, None);
            return;
        },
    };

    let method = req.method().clone();
    match method {
        Method::Put | Method::Post => {},
        Method::Get => {
            exec_status(req, 200, Some("Simple uploader\n"));
            return;
        },
        Method::Options => {
            preflight_response(req);
            return;
        },
        _ => {
            exec_status(req, 405, None);
            return;
        },
    };

    let upload = Upload {
        content_type: content_type_of(&req),
        filename,
        expected_size: req.body_length().map(|v| v as u64),
        client: client_of(&req),
        body: req.as_reader(),
    };
    let r = ingester.ingest(upload);
    if let Err(e) = &r {
        warn!("rejected upload: {}", e);
    }
    exec_response(req, &r);
}

#[cfg(test)]
mod tests {
    use super::{
        route,
        Route,
    };

    #[test]
    fn test_route_upload() {
        assert_eq!(route("/upload"), Route::Upload(None));
        assert_eq!(route("/upload/"), Route::Upload(None));
        assert_eq!(route("/upload?x=1"), Route::Upload(None));
        assert_eq!(route("/upload/report.pdf"), Route::Upload(Some(String::from("report.pdf"))));
        assert_eq!(route("/upload/my%20file.txt"), Route::Upload(Some(String::from("my file.txt"))));
    }

    #[test]
    fn test_route_traversal_decoded_not_sanitized() {
        assert_eq!(route("/upload/..%2F..%2Fetc%2Fpasswd"), Route::Upload(Some(String::from("../../etc/passwd"))));
    }

    #[test]
    fn test_route_not_found() {
        assert_eq!(route("/"), Route::NotFound);
        assert_eq!(route("/download"), Route::NotFound);
        assert_eq!(route("/upload/a/b"), Route::NotFound);
        assert_eq!(route("/uploads"), Route::NotFound);
    }
}
