pub mod fetch;
pub mod orchestrator;
pub mod summarize;

pub use orchestrator::{PeriodType, QueryResponse, ReportRequest, handle_report};
