//! Persisted snapshot (state) subsystem: codec (C2), path resolution (C3), validation (C4), and
//! backup/retention (C5).

pub mod backup;
pub mod codec;
pub mod model;
pub mod path;
pub mod validator;

pub use codec::{parse, parse_file, write_file};
pub use model::{ResourceEntry, RestorePlanItem, RestoreStatus, Snapshot};
pub use path::{resolve_path, resolve_path_with_override};
pub use validator::{find_missing_resources, validate_file, validate_state, ValidateOptions, Warning};
