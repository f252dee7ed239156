//! Staging of incoming content inside the storage root.
//!
//! Every upload is first written to its own file named `.tmp<random>.part` in the storage
//! root. Published names always start with a hex digest, so the two never overlap.
//! The staging file lives on the same volume as its final destination, which keeps the
//! publishing rename atomic.
use std::fs::{
    read_dir,
    File,
};
use std::io::{
    self,
    ErrorKind,
    Read,
    Write,
};
use std::path::Path;

use tempfile::{
    Builder,
    NamedTempFile,
};

use log::{debug, error};

use crate::digest::Accumulator;
use crate::error::IngestError;

/// Reserved prefix of staging entries in the storage root.
pub const STAGING_PREFIX: &str = ".tmp";

const STAGING_SUFFIX: &str = ".part";

/// Size of the buffer each upload is read through.
pub const CHUNK_SIZE: usize = 1 << 20;

/// Mode given to staged content before it is published. Staging files are created owner-only.
#[cfg(unix)]
pub const PUBLISHED_MODE: u32 = 0o644;

#[cfg(unix)]
fn set_published_mode(f: &File) -> io::Result<()> {
    use std::fs::Permissions;
    use std::os::unix::fs::PermissionsExt;
    f.set_permissions(Permissions::from_mode(PUBLISHED_MODE))
}

#[cfg(not(unix))]
fn set_published_mode(_f: &File) -> io::Result<()> {
    Ok(())
}

/// Content fully written to a staging file but not yet published.
///
/// Dropping a `Staged` removes the staging file.
pub struct Staged {
    pub(crate) file: NamedTempFile,
    pub size: u64,
}

impl Staged {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Whether a storage root entry is a staging artifact rather than published content.
pub fn is_staging_name(name: &str) -> bool {
    name.starts_with(STAGING_PREFIX)
}

/// Names of published entries in the storage root, sorted. Staging entries are skipped.
pub fn list_published(root: &Path) -> io::Result<Vec<String>> {
    let mut r = vec!();
    for entry in read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_staging_name(&name) {
            continue;
        }
        r.push(name);
    }
    r.sort();
    Ok(r)
}

/// Copy `stream` into a new staging file under `root`, feeding every chunk to `h` in the
/// same order it is written.
///
/// On any read or write failure the staging file is removed before the error is returned.
pub fn stage(root: &Path, mut stream: impl Read, h: &mut Accumulator) -> Result<Staged, IngestError> {
    let mut file = match Builder::new().prefix(STAGING_PREFIX).suffix(STAGING_SUFFIX).tempfile_in(root) {
        Ok(v) => v,
        Err(e) => {
            error!("cannot create staging file in {:?}: {}", root, e);
            return Err(IngestError::storage(e));
        },
    };
    debug!("staging to {:?}", file.path());

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total_size: u64 = 0;
    loop {
        let n = match stream.read(&mut buf[..]) {
            Ok(0) => {
                break;
            },
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::Interrupted => {
                continue;
            },
            Err(e) => {
                error!("cannot read from request body after {} bytes: {}", total_size, e);
                return Err(IngestError::stream(e));
            },
        };
        let data = &buf[..n];
        h.update(data);
        if let Err(e) = file.write_all(data) {
            error!("cannot write to staging file {:?}: {}", file.path(), e);
            return Err(IngestError::storage(e));
        }
        total_size += n as u64;
    }

    if let Err(e) = file.as_file().sync_all() {
        error!("cannot sync staging file {:?}: {}", file.path(), e);
        return Err(IngestError::storage(e));
    }
    if let Err(e) = set_published_mode(file.as_file()) {
        error!("cannot set mode of staging file {:?}: {}", file.path(), e);
        return Err(IngestError::storage(e));
    }
    debug!("staged {} bytes to {:?}", total_size, file.path());

    Ok(Staged {
        file,
        size: total_size,
    })
}
