//! Archive adapter: a directory packed into one zstd-compressed tar file.
//!
//! The folder's contents sit at the archive root, so unpacking into an empty
//! directory reproduces the folder exactly.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::debug;

use crate::error::{DiffPackError, Result};

pub const COMPRESSION_LEVEL: i32 = 3;

/// Pack the contents of `folder` into the archive file `archive`.
pub fn pack_dir(folder: &Path, archive: &Path) -> Result<()> {
    let fail = |e| DiffPackError::archive(archive, e);

    let file = File::create(archive).map_err(fail)?;
    let encoder = zstd::Encoder::new(BufWriter::new(file), COMPRESSION_LEVEL).map_err(fail)?;

    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    let mut top_level = std::fs::read_dir(folder)
        .and_then(|rd| rd.collect::<std::io::Result<Vec<_>>>())
        .map_err(fail)?;
    top_level.sort_by_key(|e| e.file_name());
    for entry in top_level {
        let name = entry.file_name();
        if entry.file_type().map_err(fail)?.is_dir() {
            builder.append_dir_all(&name, entry.path()).map_err(fail)?;
        } else {
            builder.append_path_with_name(entry.path(), &name).map_err(fail)?;
        }
    }

    let encoder = builder.into_inner().map_err(fail)?;
    let mut writer = encoder.finish().map_err(fail)?;
    writer.flush().map_err(fail)?;

    debug!(folder = %folder.display(), archive = %archive.display(), "packed archive");
    Ok(())
}

/// Extract the archive file `archive` into `folder`, creating it if missing.
pub fn unpack_file(archive: &Path, folder: &Path) -> Result<()> {
    let fail = |e| DiffPackError::archive(archive, e);

    let file = File::open(archive).map_err(fail)?;
    let decoder = zstd::Decoder::new(file).map_err(fail)?;

    std::fs::create_dir_all(folder).map_err(fail)?;
    let mut reader = tar::Archive::new(decoder);
    reader.set_preserve_permissions(true);
    reader.unpack(folder).map_err(fail)?;

    debug!(archive = %archive.display(), folder = %folder.display(), "unpacked archive");
    Ok(())
}
