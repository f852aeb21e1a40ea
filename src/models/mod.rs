pub mod credentials;
pub mod messages;
pub mod reading;
pub mod report;

pub use credentials::{Credentials, UserProfile};
pub use messages::{IngestMessage, NotifyMessage, ProcessMessage};
pub use reading::{dataset_key, Dataset, MalformedRecord, Reading, DEFAULT_UNIT};
pub use report::{report_key, GraphPoint, Report, ReportType, INSIGHTS_VERSION};
