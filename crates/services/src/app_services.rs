use std::sync::Arc;

use lms_core::access::Principal;
use lms_core::model::UserId;
use storage::repository::Storage;

use crate::Clock;
use crate::dashboard_service::DashboardService;
use crate::enrollment_service::EnrollmentService;
use crate::error::{AppServicesError, LmsError};
use crate::progress_service::ProgressService;

/// Assembles the services the HTTP layer talks to.
#[derive(Clone)]
pub struct AppServices {
    storage: Storage,
    enrollments: Arc<EnrollmentService>,
    progress: Arc<ProgressService>,
    dashboards: Arc<DashboardService>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization fails.
    pub async fn new_sqlite(db_url: &str, clock: Clock) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self::from_storage(storage, clock))
    }

    /// Build services over an existing storage aggregate.
    #[must_use]
    pub fn from_storage(storage: Storage, clock: Clock) -> Self {
        let enrollments = Arc::new(EnrollmentService::from_storage(clock, &storage));
        let progress = Arc::new(ProgressService::from_storage(clock, &storage));
        let dashboards = Arc::new(DashboardService::from_storage(&storage));
        Self {
            storage,
            enrollments,
            progress,
            dashboards,
        }
    }

    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Resolve an authenticated user id to a principal. `Ok(None)` for
    /// unknown users.
    ///
    /// # Errors
    ///
    /// Returns `LmsError::Storage` if the user store fails.
    pub async fn principal(&self, user_id: UserId) -> Result<Option<Principal>, LmsError> {
        let user = self.storage.users.get_user(user_id).await?;
        Ok(user.as_ref().map(Principal::from))
    }

    #[must_use]
    pub fn enrollments(&self) -> Arc<EnrollmentService> {
        Arc::clone(&self.enrollments)
    }

    #[must_use]
    pub fn progress(&self) -> Arc<ProgressService> {
        Arc::clone(&self.progress)
    }

    #[must_use]
    pub fn dashboards(&self) -> Arc<DashboardService> {
        Arc::clone(&self.dashboards)
    }
}
