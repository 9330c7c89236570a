//! The 24-byte footer appended to a `bundle`d executable: an 8-byte
//! little-endian ZIP offset, an 8-byte little-endian ZIP size, and an
//! 8-byte magic tag, in that order, so the magic is always the very
//! last 8 bytes of the file.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use thiserror::Error;

pub const MAGIC: [u8; 8] = *b"UISERVER";
pub const FOOTER_LEN: u64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleFooter {
    pub zip_offset: u64,
    pub zip_size: u64,
}

#[derive(Debug, Error)]
pub enum FooterError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("no bundle footer present")]
    NoBundle,
}

impl BundleFooter {
    pub fn to_bytes(self) -> [u8; 24] {
        let mut buf = [0u8; 24];
        buf[0..8].copy_from_slice(&self.zip_offset.to_le_bytes());
        buf[8..16].copy_from_slice(&self.zip_size.to_le_bytes());
        buf[16..24].copy_from_slice(&MAGIC);
        buf
    }

    fn from_bytes(buf: &[u8; 24]) -> Option<Self> {
        if buf[16..24] != MAGIC[..] {
            return None;
        }
        Some(Self {
            zip_offset: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            zip_size: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
        })
    }

    /// Reads the footer from the tail of `path`, if one is present.
    pub fn read_from(path: &Path) -> Result<Self, FooterError> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        if len < FOOTER_LEN {
            return Err(FooterError::NoBundle);
        }
        file.seek(SeekFrom::Start(len - FOOTER_LEN))?;
        let mut buf = [0u8; 24];
        file.read_exact(&mut buf)?;
        Self::from_bytes(&buf).ok_or(FooterError::NoBundle)
    }

    /// Reads the footer appended to the currently running executable.
    pub fn read_from_current_exe() -> Result<Self, FooterError> {
        let exe = std::env::current_exe()?;
        Self::read_from(&exe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn round_trips_through_bytes() {
        let footer = BundleFooter {
            zip_offset: 4096,
            zip_size: 2048,
        };
        let bytes = footer.to_bytes();
        assert_eq!(bytes.len(), 24);
        assert_eq!(BundleFooter::from_bytes(&bytes), Some(footer));
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut bytes = [0u8; 24];
        bytes[16..24].copy_from_slice(b"NOTAMAGC");
        assert_eq!(BundleFooter::from_bytes(&bytes), None);
    }

    #[test]
    fn reads_footer_appended_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exe");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"fake executable bytes").unwrap();
        let footer = BundleFooter {
            zip_offset: 22,
            zip_size: 100,
        };
        file.write_all(&footer.to_bytes()).unwrap();
        drop(file);

        let read = BundleFooter::read_from(&path).unwrap();
        assert_eq!(read, footer);
    }

    #[test]
    fn missing_footer_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exe");
        std::fs::write(&path, b"short").unwrap();
        assert!(matches!(
            BundleFooter::read_from(&path),
            Err(FooterError::NoBundle)
        ));
    }
}
