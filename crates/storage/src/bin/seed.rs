use anyhow::{Context, bail};
use chrono::{DateTime, Duration, Utc};
use clap::Parser;
use lms_core::model::Role;
use storage::repository::{
    NewCourseRecord, NewEnrollmentRecord, NewLessonRecord, NewUserRecord, Storage, StorageError,
};

/// Seed a database with demo users, one course and one enrollment.
#[derive(Debug, Clone, Parser)]
#[command(name = "seed")]
struct Args {
    /// SQLite URL to seed.
    #[arg(long = "db", env = "LMS_DB_URL", default_value = "sqlite:dev.sqlite3")]
    db_url: String,

    /// Title of the demo course.
    #[arg(long, env = "LMS_SEED_COURSE", default_value = "Rust Fundamentals")]
    course: String,

    /// Number of lessons to create in the demo course.
    #[arg(long, env = "LMS_SEED_LESSONS", default_value_t = 4)]
    lessons: u32,

    /// Fixed current time (RFC3339) for deterministic seeding.
    #[arg(long)]
    now: Option<DateTime<Utc>>,
}

async fn run(args: Args) -> anyhow::Result<()> {
    let storage = Storage::sqlite(&args.db_url)
        .await
        .with_context(|| format!("opening {}", args.db_url))?;
    let now = args.now.unwrap_or_else(Utc::now);

    let mut ids = Vec::with_capacity(3);
    for (email, name, role) in [
        ("admin@example.com", "Ada Admin", Role::Admin),
        ("instructor@example.com", "Ivan Instructor", Role::Instructor),
        ("student@example.com", "Sam Student", Role::Student),
    ] {
        let inserted = storage
            .users
            .insert_user(NewUserRecord {
                email: email.into(),
                display_name: name.into(),
                role,
            })
            .await;
        match inserted {
            Ok(id) => ids.push(id),
            Err(StorageError::Conflict) => {
                bail!("{} already contains {email}; nothing seeded", args.db_url);
            }
            Err(e) => return Err(e).context("inserting user"),
        }
    }
    let (admin, instructor, student) = (ids[0], ids[1], ids[2]);

    let course_id = storage
        .courses
        .insert_course(NewCourseRecord {
            instructor_id: instructor,
            title: args.course.clone(),
            is_published: true,
            created_at: now - Duration::days(7),
        })
        .await?;

    for position in 0..args.lessons {
        storage
            .courses
            .insert_lesson(NewLessonRecord {
                course_id,
                title: format!("Lesson {}", position + 1),
                position,
                is_preview: position == 0,
                created_at: now - Duration::days(7),
            })
            .await?;
    }

    let enrollment = storage
        .enrollments
        .insert_enrollment(NewEnrollmentRecord {
            student_id: student,
            course_id,
            enrolled_at: now,
        })
        .await?;

    println!(
        "Seeded users admin={admin} instructor={instructor} student={student}, \
         course {course_id} with {} lessons and enrollment {} into {}",
        args.lessons,
        enrollment.id(),
        args.db_url
    );

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    run(Args::parse()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(db_url: String) -> Args {
        Args {
            db_url,
            course: "Seeded".into(),
            lessons: 2,
            now: None,
        }
    }

    #[tokio::test]
    async fn reseeding_reports_existing_users() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("seed.sqlite3").display());

        run(args(url.clone())).await.unwrap();
        let err = run(args(url)).await.unwrap_err();
        assert!(err.to_string().contains("already contains admin@example.com"));
    }
}
