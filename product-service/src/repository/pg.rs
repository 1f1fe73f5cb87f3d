use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common_models::{ProductRecord, ProductStatus, UserRecord};
use common_server::DatabaseError;
use sqlx::PgPool;
use uuid::Uuid;

use super::{NewProduct, ProductRepository, ProductUpdate};

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    name: String,
    description: String,
    price: f64,
    quantity: i32,
    status: String,
    owner_id: Uuid,
    owner_name: String,
    owner_phone: String,
    owner_email: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProductRow> for ProductRecord {
    type Error = sqlx::Error;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        let status: ProductStatus = row
            .status
            .parse()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

        Ok(ProductRecord {
            id: row.id,
            name: row.name,
            description: row.description,
            price: row.price,
            quantity: row.quantity,
            status,
            owner_id: row.owner_id,
            owner_name: row.owner_name,
            owner_phone: row.owner_phone,
            owner_email: row.owner_email,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const COLUMNS: &str = "id, name, description, price, quantity, status, owner_id, owner_name, \
    owner_phone, owner_email, created_at, updated_at";

fn decode_one(row: Option<ProductRow>, command: &str) -> Result<Option<ProductRecord>, DatabaseError> {
    row.map(ProductRecord::try_from)
        .transpose()
        .map_err(DatabaseError::query(command))
}

fn decode_all(rows: Vec<ProductRow>) -> Result<Vec<ProductRecord>, DatabaseError> {
    rows.into_iter()
        .map(ProductRecord::try_from)
        .collect::<Result<_, _>>()
        .map_err(DatabaseError::query("SELECT"))
}

#[derive(Clone)]
pub struct PgProductRepository {
    pool: PgPool,
}

impl PgProductRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductRepository for PgProductRepository {
    async fn create(&self, product: NewProduct) -> Result<ProductRecord, DatabaseError> {
        let query = format!(
            r#"
INSERT INTO products (
    id, name, description, price, quantity, status,
    owner_id, owner_name, owner_phone, owner_email, owner_synced_at,
    created_at, updated_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW(), NOW())
RETURNING {COLUMNS}
            "#
        );

        let row: ProductRow = sqlx::query_as(&query)
            .bind(Uuid::now_v7())
            .bind(&product.name)
            .bind(&product.description)
            .bind(product.price)
            .bind(product.quantity)
            .bind(ProductStatus::Active.as_str())
            .bind(product.owner.id)
            .bind(product.owner.full_name())
            .bind(&product.owner.phone)
            .bind(&product.owner.email)
            .bind(product.owner.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::query("INSERT"))?;

        ProductRecord::try_from(row).map_err(DatabaseError::query("INSERT"))
    }

    async fn get(&self, id: Uuid) -> Result<Option<ProductRecord>, DatabaseError> {
        let row: Option<ProductRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM products WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::query("SELECT"))?;

        decode_one(row, "SELECT")
    }

    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<ProductRecord>, DatabaseError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<ProductRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM products WHERE id = ANY($1)"))
                .bind(ids)
                .fetch_all(&self.pool)
                .await
                .map_err(DatabaseError::query("SELECT"))?;

        decode_all(rows)
    }

    async fn list(&self) -> Result<Vec<ProductRecord>, DatabaseError> {
        let rows: Vec<ProductRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM products ORDER BY created_at, id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::query("SELECT"))?;

        decode_all(rows)
    }

    async fn update(
        &self,
        id: Uuid,
        update: ProductUpdate,
    ) -> Result<Option<ProductRecord>, DatabaseError> {
        let query = format!(
            r#"
UPDATE products
SET
    name = $2,
    description = $3,
    price = $4,
    quantity = $5,
    status = $6,
    updated_at = NOW()
WHERE
    id = $1
RETURNING {COLUMNS}
            "#
        );

        let row: Option<ProductRow> = sqlx::query_as(&query)
            .bind(id)
            .bind(&update.name)
            .bind(&update.description)
            .bind(update.price)
            .bind(update.quantity)
            .bind(update.status.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::query("UPDATE"))?;

        decode_one(row, "UPDATE")
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::query("DELETE"))?;

        Ok(result.rows_affected() > 0)
    }

    async fn apply_owner_change(&self, owner: &UserRecord) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            r#"
UPDATE products
SET
    owner_name = $2,
    owner_phone = $3,
    owner_email = $4,
    owner_synced_at = $5
WHERE
    owner_id = $1
    AND owner_synced_at < $5
            "#,
        )
        .bind(owner.id)
        .bind(owner.full_name())
        .bind(&owner.phone)
        .bind(&owner.email)
        .bind(owner.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::query("UPDATE"))?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common_models::UserRole;

    fn owner() -> UserRecord {
        let now = Utc::now();
        UserRecord {
            id: Uuid::now_v7(),
            first_name: "Ada".to_owned(),
            last_name: "Lovelace".to_owned(),
            email: "ada@example.com".to_owned(),
            phone: "555-0100".to_owned(),
            role: UserRole::User,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn new_product(owner: &UserRecord) -> NewProduct {
        NewProduct {
            name: "Desk lamp".to_owned(),
            description: "Brass".to_owned(),
            price: 34.5,
            quantity: 3,
            owner: owner.clone(),
        }
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_create_copies_owner_details(db: PgPool) {
        let repo = PgProductRepository::new(db);
        let owner = owner();

        let product = repo.create(new_product(&owner)).await.unwrap();

        assert_eq!(product.status, ProductStatus::Active);
        assert_eq!(product.owner_id, owner.id);
        assert_eq!(product.owner_name, "Ada Lovelace");
        assert_eq!(repo.get(product.id).await.unwrap(), Some(product));
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_owner_change_is_applied_once(db: PgPool) {
        let repo = PgProductRepository::new(db);
        let mut owner = owner();
        let product = repo.create(new_product(&owner)).await.unwrap();

        owner.first_name = "Augusta".to_owned();
        owner.updated_at += Duration::seconds(1);

        assert_eq!(repo.apply_owner_change(&owner).await.unwrap(), 1);
        assert_eq!(repo.apply_owner_change(&owner).await.unwrap(), 0);

        let product = repo.get(product.id).await.unwrap().unwrap();
        assert_eq!(product.owner_name, "Augusta Lovelace");
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_stale_owner_change_is_ignored(db: PgPool) {
        let repo = PgProductRepository::new(db);
        let owner = owner();
        let product = repo.create(new_product(&owner)).await.unwrap();

        let mut stale = owner.clone();
        stale.first_name = "Old".to_owned();
        stale.updated_at -= Duration::minutes(5);

        assert_eq!(repo.apply_owner_change(&stale).await.unwrap(), 0);
        let product = repo.get(product.id).await.unwrap().unwrap();
        assert_eq!(product.owner_name, "Ada Lovelace");
    }
}
