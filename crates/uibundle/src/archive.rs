//! Reading and writing the ZIP archive appended after the footer
//! (§4.11): `bundle` packs a site directory in, `extract`/`ls`/`cat`/`cp`
//! read entries back out, either from the running executable or from a
//! `.zip` given on the command line.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::footer::{BundleFooter, FooterError};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("zip: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Footer(#[from] FooterError),
    #[error("entry not found: {0}")]
    EntryNotFound(String),
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Appends a ZIP archive of `site_dir`'s contents, plus the footer, to a
/// copy of `exe_path` written at `out_path`. POSIX executable bits on
/// entries are preserved via `unix_permissions`, same as file modes
/// already on disk.
pub fn bundle(exe_path: &Path, site_dir: &Path, out_path: &Path) -> ArchiveResult<()> {
    fs::copy(exe_path, out_path)?;

    let zip_offset = fs::metadata(out_path)?.len();

    let mut out = fs::OpenOptions::new().append(true).open(out_path)?;
    let mut writer = ZipWriter::new(&mut out);
    add_dir_recursive(&mut writer, site_dir, site_dir)?;
    writer.finish()?;
    drop(writer);

    let zip_size = fs::metadata(out_path)?.len() - zip_offset;

    let footer = BundleFooter {
        zip_offset,
        zip_size,
    };
    let mut out = fs::OpenOptions::new().append(true).open(out_path)?;
    out.write_all(&footer.to_bytes())?;
    Ok(())
}

fn add_dir_recursive<W: Write + Seek>(
    writer: &mut ZipWriter<W>,
    root: &Path,
    dir: &Path,
) -> ArchiveResult<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let rel = path.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
        if path.is_dir() {
            add_dir_recursive(writer, root, &path)?;
        } else {
            #[cfg(unix)]
            let mode = {
                use std::os::unix::fs::PermissionsExt;
                entry.metadata()?.permissions().mode()
            };
            #[cfg(not(unix))]
            let mode = 0o644;

            let options = SimpleFileOptions::default().unix_permissions(mode);
            writer.start_file(rel, options)?;
            let mut contents = Vec::new();
            File::open(&path)?.read_to_end(&mut contents)?;
            writer.write_all(&contents)?;
        }
    }
    Ok(())
}

/// Opens the archive embedded in the running executable, if any.
pub fn open_embedded() -> ArchiveResult<ZipArchive<File>> {
    let exe = std::env::current_exe()?;
    open_from_exe(&exe)
}

/// Opens the archive appended to `exe_path`.
pub fn open_from_exe(exe_path: &Path) -> ArchiveResult<ZipArchive<File>> {
    let footer = BundleFooter::read_from(exe_path)?;
    let mut file = File::open(exe_path)?;
    file.seek(SeekFrom::Start(footer.zip_offset))?;
    let mut zip_bytes = vec![0u8; footer.zip_size as usize];
    file.read_exact(&mut zip_bytes)?;
    Ok(ZipArchive::new(io::Cursor::new(zip_bytes))?)
}

/// Opens a standalone `.zip` file given on the command line, rather
/// than one embedded in an executable.
pub fn open_standalone(path: &Path) -> ArchiveResult<ZipArchive<File>> {
    Ok(ZipArchive::new(File::open(path)?)?)
}

pub fn list_entries<R: Read + Seek>(archive: &mut ZipArchive<R>) -> ArchiveResult<Vec<String>> {
    Ok((0..archive.len())
        .map(|i| archive.by_index(i).map(|f| f.name().to_owned()))
        .collect::<Result<_, _>>()?)
}

pub fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> ArchiveResult<Vec<u8>> {
    let mut entry = archive
        .by_name(name)
        .map_err(|_| ArchiveError::EntryNotFound(name.to_owned()))?;
    let mut buf = Vec::new();
    entry.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Copies one entry out of the archive to `dest` on disk, preserving
/// the permission bits the bundler recorded for it.
pub fn copy_entry_to<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
    dest: &Path,
) -> ArchiveResult<()> {
    let mut entry = archive
        .by_name(name)
        .map_err(|_| ArchiveError::EntryNotFound(name.to_owned()))?;
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = File::create(dest)?;
    io::copy(&mut entry, &mut out)?;

    #[cfg(unix)]
    if let Some(mode) = entry.unix_mode() {
        use std::os::unix::fs::PermissionsExt;
        out.set_permissions(fs::Permissions::from_mode(mode))?;
    }
    Ok(())
}

/// True if `exe_path` has a valid bundle footer appended.
pub fn has_bundle(exe_path: &Path) -> bool {
    BundleFooter::read_from(exe_path).is_ok()
}
