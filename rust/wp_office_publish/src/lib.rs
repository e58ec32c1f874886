// Office/HTML to WordPress page publishing: normalizer, REST publisher and
// single-slot revision guard.

mod assets;
mod css;
mod encoding;
mod error;
mod export;
mod guard;
mod normalize;
mod publisher;
mod sanitize;
mod session;
#[cfg(test)]
mod testing;
mod tree;
mod wordpress;

pub use assets::companion_dirs;
pub use encoding::{decode_html, Decoded, EncodingSource};
pub use error::{PublishError, RemoteState, Step, StepError};
pub use export::{prepare_source, DocumentKind, ExportError, OfficeExporter, SofficeExporter};
pub use guard::{Backup, GuardState, RevisionGuard, DEFAULT_BACKUP_FILE};
pub use normalize::{
    normalize, normalize_bytes, normalize_file, normalize_with, CleanedHtml, Diagnostic,
    NormalizeOptions, ResourceKind,
};
pub use publisher::{Credentials, PageId, PagePublisher, PageRef, PageSummary};
pub use session::{Outcome, PendingOp, Session};
pub use wordpress::{WpClient, WpConfig};
