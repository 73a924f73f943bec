#![forbid(unsafe_code)]

pub mod app_services;
pub mod dashboard_service;
pub mod enrollment_service;
pub mod error;
pub mod progress_service;

pub use lms_core::Clock;

pub use app_services::AppServices;
pub use dashboard_service::{
    AdminSummary, DashboardService, InstructorSummary, RecentEnrollment, StudentSummary,
};
pub use enrollment_service::EnrollmentService;
pub use error::{AppServicesError, LmsError};
pub use progress_service::ProgressService;
