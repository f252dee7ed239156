use std::str::FromStr;

use ascii::AsciiString;
use tiny_http::{
    StatusCode,
    Request,
    Response,
    Header,
    HeaderField,
};

use log::{debug, error};

use crate::error::{
    IngestError,
    IngestErrorType,
};
use crate::ingest::Receipt;


fn header(field: &str, value: &str) -> Option<Header> {
    let field = match HeaderField::from_str(field) {
        Ok(v) => v,
        Err(_) => {
            return None;
        },
    };
    let value = match AsciiString::from_ascii(value) {
        Ok(v) => v,
        Err(_) => {
            return None;
        },
    };
    Some(Header{
        field,
        value,
    })
}

/// Headers sent with every response.
pub fn origin_headers() -> Vec<Header> {
    let server_header_v = format!("hashput/{}, tiny_http (Rust)", env!("CARGO_PKG_VERSION"));
    let candidates = [
        ("Access-Control-Allow-Origin", "*"),
        ("Access-Control-Allow-Methods", "OPTIONS, PUT, POST, GET"),
        ("Access-Control-Allow-Headers", "Content-Type"),
        ("Server", server_header_v.as_str()),
    ];
    candidates.iter().filter_map(|(k, v)| header(k, v)).collect()
}

/// HTTP status for a finished upload.
pub fn status_of(r: &Result<Receipt, IngestError>) -> StatusCode {
    match r {
        Ok(_) => StatusCode(200),
        Err(e) => {
            match e.typ {
                IngestErrorType::ClientError => StatusCode(400),
                IngestErrorType::StreamError => StatusCode(500),
                IngestErrorType::StorageError => StatusCode(500),
                IngestErrorType::InternalError => StatusCode(500),
            }
        },
    }
}

/// Body for a finished upload: the published name, or what went wrong.
pub fn body_of(r: &Result<Receipt, IngestError>) -> String {
    match r {
        Ok(v) => format!("{}\n", v.name),
        Err(e) => format!("{}\n", e.public_message()),
    }
}

fn respond(req: Request, res: Response<std::io::Cursor<Vec<u8>>>) {
    let mut res = res;
    for v in origin_headers() {
        res.add_header(v);
    }
    if let Err(e) = req.respond(res) {
        error!("cannot send response: {}", e);
    }
}

pub fn preflight_response(req: Request) {
    respond(req, Response::from_data(vec!()));
    debug!("served options request");
}

/// Answer with `status` and an optional plain text body.
pub fn exec_status(req: Request, status: u16, body: Option<&str>) {
    let res = match body {
        Some(v) => Response::from_string(v),
        None => Response::from_data(vec!()),
    };
    respond(req, res.with_status_code(StatusCode(status)));
}

pub fn exec_response(req: Request, r: &Result<Receipt, IngestError>) {
    let res = Response::from_string(body_of(r)).with_status_code(status_of(r));
    respond(req, res);
}
