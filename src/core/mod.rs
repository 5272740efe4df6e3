mod detector;
mod fix;
mod issue;
mod scan;
mod severity;

pub use detector::{DetectorInfo, DetectorProgress, DetectorStatus};
pub use fix::{BatchFixResult, FixError, FixResult};
pub use issue::{Fixability, Issue, IssueKey, count_fixable};
pub use scan::{ProbeError, ScanResult};
pub use severity::Severity;
