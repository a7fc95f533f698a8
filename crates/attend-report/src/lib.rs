//! attend-report: Persistent attendance report and outward notification.

pub mod notify;
pub mod store;

pub use notify::{HttpNotifier, NotifyError};
pub use store::{ReportError, ReportStore};
