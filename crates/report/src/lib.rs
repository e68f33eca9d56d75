//! Report domain: the entity the saga works for.
//!
//! The saga orchestrates report generation but only touches the report row
//! through the narrow [`ReportService`] surface (status and file-metadata
//! updates); everything else here serves the HTTP API.

pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod service;
pub mod store;

pub use error::ReportError;
pub use memory::InMemoryReportStore;
pub use model::{NewReport, Report, ReportStatus, ReportUpdate};
pub use postgres::PostgresReportStore;
pub use service::ReportService;
pub use store::{ReportPage, ReportStore};
