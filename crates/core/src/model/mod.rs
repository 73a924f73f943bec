mod course;
mod enrollment;
mod ids;
mod progress;
mod user;

pub use ids::{CourseId, EnrollmentId, LessonId, ParseIdError, UserId};

pub use course::{Course, CourseError, Lesson};
pub use enrollment::{Enrollment, EnrollmentError, EnrollmentStatus, Progress, ProgressUpdate};
pub use progress::{ProgressRecord, ProgressRecordError, Upserted};
pub use user::{Role, User, UserError};
