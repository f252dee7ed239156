#![crate_name = "hashput"]

//! hashput is a streaming HTTP upload sink.
//! Uploaded content is hashed while it is written to disk, and the finished file is published
//! in the storage directory under a name derived from that hash:
//!
//! ``` ignore,
//! <digest>_<filename>
//! ```
//!
//! The digest is SHA1 by default, in hex, lowercase, without a 0x prefix. SHA256 can be chosen
//! instead when starting the server.
//!
//! ## Uploading content
//!
//! Content is stored by making `PUT` or `POST` requests to `/upload` or `/upload/<filename>`.
//! The body is either the raw file content, or a `multipart/form-data` form with a `file` field
//! and an optional `metadata` field holding JSON. With a server running on `localhost:8080`,
//! a `PUT` to `/upload` with the content body `hello world` is stored as:
//!
//! ``` ignore,
//! 2aae6c35c94fcfb415dbe95f408b9ce91ee846ed_upload.dat
//! ```
//!
//! The response body is the published name.
//!
//! ## Atomic publishing
//!
//! Content is never visible under its published name before it is completely written. Uploads
//! are staged in the storage directory under names starting with `.tmp`, and renamed once
//! the body has been received in full. An upload that fails or is cut short leaves nothing
//! behind. See the [stage](crate::stage) and [publish](crate::publish) modules.
//!
//! ## Running the daemon
//!
//! The daemon listens on `127.0.0.1:8080` by default, and stores files in the current
//! directory. See `cargo run -- --help` for details.

/// Error type shared by all stages of an upload.
pub mod error;

/// Incremental content hashing.
pub mod digest;

/// Locates the uploaded file in a request body.
pub mod source;

/// Writes incoming content to staging files.
pub mod stage;

/// Moves staged content to its published name.
pub mod publish;

/// Runs an upload from request body to published file.
pub mod ingest;

/// Reports the outcome of every upload.
pub mod trace;

/// Encapsulates an incoming remote request.
pub mod request;

/// Encapsulates an outgoing response to remote.
pub mod response;
