use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common_models::{UserRecord, UserRole};
use common_server::DatabaseError;
use sqlx::PgPool;
use uuid::Uuid;

use super::{NewUser, UserRepository, UserUpdate};

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    first_name: String,
    last_name: String,
    email: String,
    phone: String,
    role: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for UserRecord {
    type Error = sqlx::Error;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role: UserRole = row
            .role
            .parse()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

        Ok(UserRecord {
            id: row.id,
            first_name: row.first_name,
            last_name: row.last_name,
            email: row.email,
            phone: row.phone,
            role,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn decode_all(rows: Vec<UserRow>) -> Result<Vec<UserRecord>, DatabaseError> {
    rows.into_iter()
        .map(UserRecord::try_from)
        .collect::<Result<_, _>>()
        .map_err(DatabaseError::query("SELECT"))
}

const COLUMNS: &str =
    "id, first_name, last_name, email, phone, role, is_active, created_at, updated_at";

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, user: NewUser) -> Result<UserRecord, DatabaseError> {
        let query = format!(
            r#"
INSERT INTO users (id, first_name, last_name, email, phone, role, is_active, created_at, updated_at)
VALUES ($1, $2, $3, $4, $5, $6, TRUE, NOW(), NOW())
RETURNING {COLUMNS}
            "#
        );

        let row: UserRow = sqlx::query_as(&query)
            .bind(Uuid::now_v7())
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.email)
            .bind(&user.phone)
            .bind(user.role.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|error| {
                if matches!(&error, sqlx::Error::Database(db) if db.is_unique_violation()) {
                    DatabaseError::Conflict("email already exists".to_owned())
                } else {
                    DatabaseError::query("INSERT")(error)
                }
            })?;

        UserRecord::try_from(row).map_err(DatabaseError::query("INSERT"))
    }

    async fn get(&self, id: Uuid) -> Result<Option<UserRecord>, DatabaseError> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM users WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::query("SELECT"))?;

        row.map(UserRecord::try_from)
            .transpose()
            .map_err(DatabaseError::query("SELECT"))
    }

    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<UserRecord>, DatabaseError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<UserRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM users WHERE id = ANY($1)"))
                .bind(ids)
                .fetch_all(&self.pool)
                .await
                .map_err(DatabaseError::query("SELECT"))?;

        decode_all(rows)
    }

    async fn list(&self) -> Result<Vec<UserRecord>, DatabaseError> {
        let rows: Vec<UserRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM users ORDER BY created_at, id"))
                .fetch_all(&self.pool)
                .await
                .map_err(DatabaseError::query("SELECT"))?;

        decode_all(rows)
    }

    async fn update(
        &self,
        id: Uuid,
        update: UserUpdate,
    ) -> Result<Option<UserRecord>, DatabaseError> {
        let query = format!(
            r#"
UPDATE users
SET
    first_name = $2,
    last_name = $3,
    phone = $4,
    is_active = $5,
    updated_at = NOW()
WHERE
    id = $1
RETURNING {COLUMNS}
            "#
        );

        let row: Option<UserRow> = sqlx::query_as(&query)
            .bind(id)
            .bind(&update.first_name)
            .bind(&update.last_name)
            .bind(&update.phone)
            .bind(update.is_active)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::query("UPDATE"))?;

        row.map(UserRecord::try_from)
            .transpose()
            .map_err(DatabaseError::query("UPDATE"))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::query("DELETE"))?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            first_name: "Grace".to_owned(),
            last_name: "Hopper".to_owned(),
            email: email.to_owned(),
            phone: "555-0100".to_owned(),
            role: UserRole::User,
        }
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_create_and_get(db: PgPool) {
        let repo = PgUserRepository::new(db);

        let created = repo.create(new_user("grace@example.com")).await.unwrap();
        let fetched = repo.get(created.id).await.unwrap().expect("user should exist");

        assert_eq!(fetched, created);
        assert!(fetched.is_active);
        assert_eq!(fetched.role, UserRole::User);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_duplicate_email_conflicts(db: PgPool) {
        let repo = PgUserRepository::new(db);
        repo.create(new_user("dup@example.com")).await.unwrap();

        let result = repo.create(new_user("dup@example.com")).await;

        assert!(matches!(result, Err(DatabaseError::Conflict(_))));
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_update_bumps_updated_at(db: PgPool) {
        let repo = PgUserRepository::new(db);
        let created = repo.create(new_user("g@example.com")).await.unwrap();

        let updated = repo
            .update(
                created.id,
                UserUpdate {
                    first_name: "Amazing".to_owned(),
                    last_name: "Grace".to_owned(),
                    phone: "555-0199".to_owned(),
                    is_active: true,
                },
            )
            .await
            .unwrap()
            .expect("user should exist");

        assert_eq!(updated.full_name(), "Amazing Grace");
        assert!(updated.updated_at > created.updated_at);
        assert!(repo
            .update(Uuid::now_v7(), UserUpdate {
                first_name: String::new(),
                last_name: String::new(),
                phone: String::new(),
                is_active: false,
            })
            .await
            .unwrap()
            .is_none());
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_get_many_skips_unknown(db: PgPool) {
        let repo = PgUserRepository::new(db);
        let a = repo.create(new_user("a@example.com")).await.unwrap();
        let b = repo.create(new_user("b@example.com")).await.unwrap();

        let mut found = repo
            .get_many(&[a.id, Uuid::now_v7(), b.id])
            .await
            .unwrap();
        found.sort_by_key(|u| u.id);

        let mut expected = vec![a, b];
        expected.sort_by_key(|u| u.id);
        assert_eq!(found, expected);
    }
}
