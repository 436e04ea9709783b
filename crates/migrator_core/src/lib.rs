//! Migrator core: pure domain logic with no network, clock or disk side effects.
mod attachments;
mod classify;
mod convert;
mod message;
mod model;
mod progress;

pub use attachments::{
    file_extension, is_image_extension, sanitize_filename, validate_path, AttachmentLinker,
    PathError, RewriteOutcome, IMAGE_EXTENSIONS, PLACEHOLDER_FILENAME,
};
pub use classify::{
    classify_default, is_rate_limit_signature, ErrorClass, RawError, RawErrorKind,
    DEFAULT_RATE_LIMIT_RESET, SECONDARY_RATE_LIMIT_RESET,
};
pub use convert::{ContentConverter, DEFAULT_MAX_QUOTE_PASSES};
pub use message::{convert_mentions, FormatError, MessageFormatter, MessageHeader};
pub use model::{ChildItem, FileRef, FileRefError, PostId, ThreadId, WorkUnit};
pub use progress::ProgressState;
