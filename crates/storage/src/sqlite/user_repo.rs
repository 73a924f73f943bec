use lms_core::model::{Role, User, UserId};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{db_err, id_i64, map_user_row, ser, user_id_from_i64};
use crate::repository::{NewUserRecord, StorageError, UserRepository};

#[async_trait::async_trait]
impl UserRepository for SqliteRepository {
    async fn insert_user(&self, user: NewUserRecord) -> Result<UserId, StorageError> {
        let res = sqlx::query(
            r"
            INSERT INTO users (email, display_name, role)
            VALUES (?1, ?2, ?3)
            ",
        )
        .bind(user.email.trim().to_owned())
        .bind(user.display_name)
        .bind(user.role.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        user_id_from_i64(res.last_insert_rowid())
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StorageError> {
        let row = sqlx::query("SELECT id, email, display_name, role FROM users WHERE id = ?1")
            .bind(id_i64("user_id", id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        row.as_ref().map(map_user_row).transpose()
    }

    async fn count_users_by_role(&self) -> Result<Vec<(Role, u64)>, StorageError> {
        let rows = sqlx::query("SELECT role, COUNT(*) AS n FROM users GROUP BY role")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let mut counts: Vec<(Role, u64)> = Role::ALL.iter().map(|r| (*r, 0)).collect();
        for row in rows {
            let role: Role = row
                .try_get::<String, _>("role")
                .map_err(ser)?
                .parse()
                .map_err(ser)?;
            let n = u64::try_from(row.try_get::<i64, _>("n").map_err(ser)?).map_err(ser)?;
            if let Some(slot) = counts.iter_mut().find(|(r, _)| *r == role) {
                slot.1 = n;
            }
        }
        Ok(counts)
    }
}
