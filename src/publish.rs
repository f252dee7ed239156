//! Publication of staged content under its content-addressed name.
//!
//! The final name is `<digest>_<filename>`. Publishing is a single rename within the
//! storage root, so a reader either sees the complete content under that name or no file
//! at all.
//!
//! If the name already exists it is _overwritten_. The same digest and the same filename
//! can only mean the same content, so readers cannot tell the difference.
//!
//! If the rename fails the staging file is removed and nothing is published.
use std::path::{
    Path,
    PathBuf,
};

use log::{debug, error};

use crate::error::IngestError;
use crate::stage::Staged;


/// Content-addressed name for `filename` with content digest `digest`.
pub fn final_name(digest: &str, filename: &str) -> String {
    format!("{}_{}", digest, filename)
}

/// Atomically move `staged` into `root` under its content-addressed name.
///
/// `filename` must already be sanitized to a bare base name.
pub fn publish(staged: Staged, root: &Path, digest: &str, filename: &str) -> Result<PathBuf, IngestError> {
    let final_path = root.join(final_name(digest, filename));
    debug!("publishing {:?} -> {:?}", staged.path(), &final_path);
    match staged.file.persist(&final_path) {
        Ok(_) => {},
        Err(e) => {
            error!("cannot rename {:?} to {:?}: {}", e.file.path(), &final_path, e.error);
            // the staging file goes with the returned handle
            return Err(IngestError::storage(e.error));
        },
    };
    Ok(final_path)
}
