//! Tar packing for [`EngineClient::copy_to_container`](super::EngineClient::copy_to_container).
//!
//! The engine's copy endpoint accepts a tar stream and unpacks it below the
//! destination path.

use std::fs;
use std::io;
use std::path::Path;

/// Pack a single file named `name` with the given contents and mode.
pub fn single_file(name: &str, contents: &[u8], mode: u32) -> io::Result<Vec<u8>> {
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(mode);
    header.set_mtime(0);
    header.set_cksum();

    let mut builder = tar::Builder::new(Vec::new());
    builder.append_data(&mut header, name, contents)?;
    builder.into_inner()
}

/// Pack the contents of `dir`, with paths relative to it.
///
/// Top-level entries whose names appear in `exclude` are skipped along with
/// everything below them. Entries are added in name order.
pub fn directory(dir: &Path, exclude: &[&str]) -> io::Result<Vec<u8>> {
    if !dir.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} is not a directory", dir.display()),
        ));
    }

    let mut builder = tar::Builder::new(Vec::new());
    append_tree(&mut builder, dir, Path::new(""), exclude)?;
    builder.into_inner()
}

fn append_tree(
    builder: &mut tar::Builder<Vec<u8>>,
    dir: &Path,
    relative: &Path,
    exclude: &[&str],
) -> io::Result<()> {
    let mut entries = fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let name = entry.file_name();
        if relative.as_os_str().is_empty()
            && exclude.iter().any(|excluded| name.as_os_str() == *excluded)
        {
            continue;
        }

        let path = entry.path();
        let archive_path = relative.join(&name);
        if entry.file_type()?.is_dir() {
            builder.append_dir(&archive_path, &path)?;
            append_tree(builder, &path, &archive_path, exclude)?;
        } else {
            builder.append_path_with_name(&path, &archive_path)?;
        }
    }

    Ok(())
}
