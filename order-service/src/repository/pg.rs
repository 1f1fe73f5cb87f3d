use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common_server::DatabaseError;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::model::{Order, OrderItem, OrderStatus};

use super::{NewOrder, NewOrderItem, OrderRepository, StatusChange};

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    user_id: Uuid,
    status: String,
    total_amount: f64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    id: Uuid,
    order_id: Uuid,
    product_id: Uuid,
    product_name: String,
    quantity: i32,
    unit_price: f64,
    created_at: DateTime<Utc>,
}

impl From<ItemRow> for OrderItem {
    fn from(row: ItemRow) -> Self {
        OrderItem {
            id: row.id,
            order_id: row.order_id,
            product_id: row.product_id,
            product_name: row.product_name,
            quantity: row.quantity,
            unit_price: row.unit_price,
            created_at: row.created_at,
        }
    }
}

fn parse_status(status: &str) -> Result<OrderStatus, sqlx::Error> {
    status.parse().map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> Result<Order, sqlx::Error> {
        Ok(Order {
            id: self.id,
            user_id: self.user_id,
            status: parse_status(&self.status)?,
            total_amount: self.total_amount,
            items,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const ORDER_COLUMNS: &str = "id, user_id, status, total_amount, created_at, updated_at";
const ITEM_COLUMNS: &str =
    "id, order_id, product_id, product_name, quantity, unit_price, created_at";

#[derive(Clone)]
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_item(
        tx: &mut Transaction<'_, Postgres>,
        order_id: Uuid,
        item: &NewOrderItem,
    ) -> Result<OrderItem, DatabaseError> {
        let query = format!(
            r#"
INSERT INTO order_items (id, order_id, product_id, product_name, quantity, unit_price, product_synced_at, created_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
RETURNING {ITEM_COLUMNS}
            "#
        );

        let row: ItemRow = sqlx::query_as(&query)
            .bind(Uuid::now_v7())
            .bind(order_id)
            .bind(item.product_id)
            .bind(&item.product_name)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.product_synced_at)
            .fetch_one(&mut **tx)
            .await
            .map_err(DatabaseError::query("INSERT"))?;

        Ok(row.into())
    }

    /// Items of every order in `order_ids`, grouped by order.
    async fn items_of(&self, order_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<OrderItem>>, DatabaseError> {
        let rows: Vec<ItemRow> = sqlx::query_as(&format!(
            "SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = ANY($1) ORDER BY created_at, id"
        ))
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::query("SELECT"))?;

        let mut grouped: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for row in rows {
            grouped.entry(row.order_id).or_default().push(row.into());
        }
        Ok(grouped)
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn create(&self, order: NewOrder) -> Result<Order, DatabaseError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(DatabaseError::transaction("BEGIN"))?;

        let query = format!(
            r#"
INSERT INTO orders (id, user_id, status, total_amount, created_at, updated_at)
VALUES ($1, $2, $3, $4, NOW(), NOW())
RETURNING {ORDER_COLUMNS}
            "#
        );
        let row: OrderRow = sqlx::query_as(&query)
            .bind(Uuid::now_v7())
            .bind(order.user_id)
            .bind(OrderStatus::Pending.as_str())
            .bind(order.total_amount)
            .fetch_one(&mut *tx)
            .await
            .map_err(DatabaseError::query("INSERT"))?;

        let mut items = Vec::with_capacity(order.items.len());
        for item in &order.items {
            items.push(Self::insert_item(&mut tx, row.id, item).await?);
        }

        tx.commit()
            .await
            .map_err(DatabaseError::transaction("COMMIT"))?;

        row.into_order(items).map_err(DatabaseError::query("INSERT"))
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>, DatabaseError> {
        let row: Option<OrderRow> =
            sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::query("SELECT"))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let items = self.items_of(&[id]).await?.remove(&id).unwrap_or_default();

        row.into_order(items)
            .map(Some)
            .map_err(DatabaseError::query("SELECT"))
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, DatabaseError> {
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at, id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::query("SELECT"))?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
        let mut items = self.items_of(&ids).await?;

        rows.into_iter()
            .map(|row| {
                let order_items = items.remove(&row.id).unwrap_or_default();
                row.into_order(order_items)
            })
            .collect::<Result<_, _>>()
            .map_err(DatabaseError::query("SELECT"))
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: OrderStatus,
        expected: Option<OrderStatus>,
    ) -> Result<StatusChange, DatabaseError> {
        let updated = sqlx::query(
            r#"
UPDATE orders
SET
    status = $2,
    updated_at = NOW()
WHERE
    id = $1
    AND ($3::TEXT IS NULL OR status = $3)
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(expected.map(|expected| expected.as_str()))
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::query("UPDATE"))?;

        if updated.rows_affected() == 0 {
            let current: Option<(String,)> =
                sqlx::query_as("SELECT status FROM orders WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(DatabaseError::query("SELECT"))?;

            return match current {
                None => Ok(StatusChange::NotFound),
                Some((current,)) => Ok(StatusChange::Rejected {
                    current: parse_status(&current).map_err(DatabaseError::query("SELECT"))?,
                }),
            };
        }

        match self.get(id).await? {
            Some(order) => Ok(StatusChange::Updated(order)),
            None => Ok(StatusChange::NotFound),
        }
    }

    async fn rename_product(
        &self,
        product_id: Uuid,
        name: &str,
        synced_at: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            r#"
UPDATE order_items
SET
    product_name = $2,
    product_synced_at = $3
WHERE
    product_id = $1
    AND product_synced_at < $3
            "#,
        )
        .bind(product_id)
        .bind(name)
        .bind(synced_at)
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

    fn item(product_id: Uuid, name: &str, synced_at: DateTime<Utc>) -> NewOrderItem {
        NewOrderItem {
            product_id,
            product_name: name.to_owned(),
            quantity: 2,
            unit_price: 5.0,
            product_synced_at: synced_at,
        }
    }

    fn new_order(user_id: Uuid, items: Vec<NewOrderItem>) -> NewOrder {
        NewOrder {
            user_id,
            total_amount: items
                .iter()
                .map(|item| item.unit_price * f64::from(item.quantity))
                .sum(),
            items,
        }
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_create_stores_order_with_items(db: PgPool) {
        let repo = PgOrderRepository::new(db);
        let user_id = Uuid::now_v7();
        let now = Utc::now();

        let order = repo
            .create(new_order(
                user_id,
                vec![item(Uuid::now_v7(), "Lamp", now), item(Uuid::now_v7(), "Desk", now)],
            ))
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.total_amount, 20.0);
        assert_eq!(order.items.len(), 2);
        assert_eq!(repo.get(order.id).await.unwrap(), Some(order.clone()));
        assert_eq!(repo.list_for_user(user_id).await.unwrap(), vec![order]);
        assert!(repo.list_for_user(Uuid::now_v7()).await.unwrap().is_empty());
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_update_status_checks_expected_status(db: PgPool) {
        let repo = PgOrderRepository::new(db);
        let order = repo
            .create(new_order(Uuid::now_v7(), vec![item(Uuid::now_v7(), "Lamp", Utc::now())]))
            .await
            .unwrap();

        let shipped = repo
            .update_status(order.id, OrderStatus::Shipped, None)
            .await
            .unwrap();
        assert!(matches!(shipped, StatusChange::Updated(ref o) if o.status == OrderStatus::Shipped));

        let cancel = repo
            .update_status(order.id, OrderStatus::Cancelled, Some(OrderStatus::Pending))
            .await
            .unwrap();
        assert_eq!(
            cancel,
            StatusChange::Rejected {
                current: OrderStatus::Shipped
            }
        );

        let missing = repo
            .update_status(Uuid::now_v7(), OrderStatus::Shipped, None)
            .await
            .unwrap();
        assert_eq!(missing, StatusChange::NotFound);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_rename_product_is_guarded_by_sync_time(db: PgPool) {
        let repo = PgOrderRepository::new(db);
        let lamp = Uuid::now_v7();
        let synced_at = Utc::now() - Duration::minutes(1);
        let order = repo
            .create(new_order(
                Uuid::now_v7(),
                vec![item(lamp, "Lamp", synced_at), item(Uuid::now_v7(), "Desk", synced_at)],
            ))
            .await
            .unwrap();

        let renamed_at = synced_at + Duration::seconds(30);
        assert_eq!(repo.rename_product(lamp, "Floor lamp", renamed_at).await.unwrap(), 1);
        assert_eq!(repo.rename_product(lamp, "Floor lamp", renamed_at).await.unwrap(), 0);
        assert_eq!(repo.rename_product(lamp, "Old lamp", synced_at).await.unwrap(), 0);

        let order = repo.get(order.id).await.unwrap().unwrap();
        let names: Vec<&str> = order.items.iter().map(|item| item.product_name.as_str()).collect();
        assert!(names.contains(&"Floor lamp"));
        assert!(names.contains(&"Desk"));
    }
}
