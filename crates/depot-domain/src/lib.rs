#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod clock;
pub mod language;
pub mod paths;
pub mod readme;

pub use clock::{format_rfc3339, timestamp_secs};
pub use language::{language_for_extension, language_percentages};
pub use paths::{
    is_reserved_dir, normalize_entry_path, resolve_under_root, validate_identifier, DELETED_HASH,
    HISTORY_DIR, MARKER_DIR,
};
pub use readme::README_CANDIDATES;
