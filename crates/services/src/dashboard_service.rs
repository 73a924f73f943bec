use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lms_core::access::{self, Dashboard, EnrollmentScope, Principal};
use lms_core::model::{CourseId, Enrollment, EnrollmentId, EnrollmentStatus, Progress, Role};
use storage::repository::{CourseRepository, EnrollmentRepository, Storage, UserRepository};
use tracing::warn;

use crate::error::LmsError;

const RECENT_LIMIT: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminSummary {
    pub users_by_role: Vec<(Role, u64)>,
    pub total_users: u64,
    pub courses: u64,
    pub enrollments: u64,
    pub enrollments_by_status: Vec<(EnrollmentStatus, u64)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructorSummary {
    pub courses: u64,
    pub students: u64,
    pub enrollments: u64,
    pub average_progress: Progress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentEnrollment {
    pub enrollment_id: EnrollmentId,
    pub course_id: CourseId,
    pub course_title: String,
    pub status: EnrollmentStatus,
    pub progress: Progress,
    pub enrolled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentSummary {
    pub enrolled: u64,
    pub active: u64,
    pub completed: u64,
    pub average_progress: Progress,
    pub recent: Vec<RecentEnrollment>,
}

fn count_where(enrollments: &[Enrollment], status: EnrollmentStatus) -> u64 {
    enrollments.iter().filter(|e| e.status() == status).count() as u64
}

/// Read-only role summaries computed from the stores.
#[derive(Clone)]
pub struct DashboardService {
    users: Arc<dyn UserRepository>,
    courses: Arc<dyn CourseRepository>,
    enrollments: Arc<dyn EnrollmentRepository>,
}

impl DashboardService {
    #[must_use]
    pub fn new(
        users: Arc<dyn UserRepository>,
        courses: Arc<dyn CourseRepository>,
        enrollments: Arc<dyn EnrollmentRepository>,
    ) -> Self {
        Self {
            users,
            courses,
            enrollments,
        }
    }

    #[must_use]
    pub fn from_storage(storage: &Storage) -> Self {
        Self::new(
            Arc::clone(&storage.users),
            Arc::clone(&storage.courses),
            Arc::clone(&storage.enrollments),
        )
    }

    fn authorize(principal: &Principal, dashboard: Dashboard) -> Result<(), LmsError> {
        access::authorize_dashboard(principal, dashboard).map_err(|err| {
            warn!(user = %principal.user_id, ?dashboard, "dashboard rejected");
            LmsError::from(err)
        })
    }

    /// Platform-wide counts.
    ///
    /// # Errors
    ///
    /// `Forbidden` for non-admins.
    pub async fn admin_summary(&self, principal: &Principal) -> Result<AdminSummary, LmsError> {
        Self::authorize(principal, Dashboard::Admin)?;

        let users_by_role = self.users.count_users_by_role().await?;
        let enrollments = self.enrollments.list_enrollments(EnrollmentScope::All).await?;
        Ok(AdminSummary {
            total_users: users_by_role.iter().map(|(_, n)| n).sum(),
            users_by_role,
            courses: self.courses.count_courses().await?,
            enrollments: enrollments.len() as u64,
            enrollments_by_status: EnrollmentStatus::ALL
                .iter()
                .map(|s| (*s, count_where(&enrollments, *s)))
                .collect(),
        })
    }

    /// Counts over the caller's own courses.
    ///
    /// # Errors
    ///
    /// `Forbidden` for students.
    pub async fn instructor_summary(
        &self,
        principal: &Principal,
    ) -> Result<InstructorSummary, LmsError> {
        Self::authorize(principal, Dashboard::Instructor)?;

        let courses = self.courses.courses_for_instructor(principal.user_id).await?;
        let enrollments = self
            .enrollments
            .list_enrollments(EnrollmentScope::InstructedBy(principal.user_id))
            .await?;
        let students: BTreeSet<_> = enrollments.iter().map(Enrollment::student_id).collect();

        Ok(InstructorSummary {
            courses: courses.len() as u64,
            students: students.len() as u64,
            enrollments: enrollments.len() as u64,
            average_progress: Progress::average(enrollments.iter().map(Enrollment::progress)),
        })
    }

    /// Counts over the caller's own enrollments plus the most recent ones.
    ///
    /// # Errors
    ///
    /// Returns `LmsError::Storage` if repository access fails.
    pub async fn student_summary(&self, principal: &Principal) -> Result<StudentSummary, LmsError> {
        Self::authorize(principal, Dashboard::Student)?;

        let enrollments = self
            .enrollments
            .list_enrollments(EnrollmentScope::StudentIs(principal.user_id))
            .await?;

        let mut recent = Vec::with_capacity(RECENT_LIMIT);
        for enrollment in enrollments.iter().take(RECENT_LIMIT) {
            let title = self
                .courses
                .get_course(enrollment.course_id())
                .await?
                .map(|c| c.title().to_owned())
                .unwrap_or_default();
            recent.push(RecentEnrollment {
                enrollment_id: enrollment.id(),
                course_id: enrollment.course_id(),
                course_title: title,
                status: enrollment.status(),
                progress: enrollment.progress(),
                enrolled_at: enrollment.enrolled_at(),
            });
        }

        Ok(StudentSummary {
            enrolled: enrollments.len() as u64,
            active: count_where(&enrollments, EnrollmentStatus::Active),
            completed: count_where(&enrollments, EnrollmentStatus::Completed),
            average_progress: Progress::average(enrollments.iter().map(Enrollment::progress)),
            recent,
        })
    }
}
