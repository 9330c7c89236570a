//! uibundle: self-contained executable bundle format and static site
//! delivery (spec.md §6 ambient boundary — see SPEC_FULL.md §4.11).
//!
//! A bundled executable is the original binary with a ZIP of a site
//! directory appended, followed by a 24-byte footer identifying where
//! the ZIP starts. `ui-server bundle`/`extract`/`ls`/`cat`/`cp` all
//! operate on this shape; `serve_site` is what the running server calls
//! to answer a static-asset request.

pub mod archive;
#[cfg(feature = "embed-ui")]
pub mod assets;
pub mod footer;
pub mod serve;

pub use archive::{
    bundle, copy_entry_to, has_bundle, list_entries, open_embedded, open_from_exe,
    open_standalone, read_entry, ArchiveError, ArchiveResult,
};
pub use footer::{BundleFooter, FooterError, FOOTER_LEN, MAGIC};
pub use serve::{non_embedded_placeholder, serve_from_archive, serve_site, validate_site_request, SiteRequestError};
