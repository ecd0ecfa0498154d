pub mod archive;
pub mod resource;
pub mod settings;
pub mod stats;
pub mod target;

pub use archive::ArchiveEntry;
pub use resource::{fingerprint, MediaKind, ResourceCandidate};
pub use settings::{FilterRules, MessageFormat, NotificationSettings};
pub use stats::{Counter, EventKind, Outcome, StatRecord, StatsSummary};
pub use target::{CheckUpdate, TargetKey, TrackedTarget};
