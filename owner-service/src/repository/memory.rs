use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common_models::UserRecord;
use common_server::DatabaseError;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{NewUser, UserRepository, UserUpdate};

/// Users kept in process memory. Can be primed to fail every call.
#[derive(Clone, Default)]
pub struct MemoryUserRepository {
    users: Arc<Mutex<HashMap<Uuid, UserRecord>>>,
    failure: Option<String>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, reason: &str) -> Self {
        self.failure = Some(reason.to_owned());
        self
    }

    fn check(&self) -> Result<(), DatabaseError> {
        match &self.failure {
            Some(reason) => Err(DatabaseError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn create(&self, user: NewUser) -> Result<UserRecord, DatabaseError> {
        self.check()?;
        let mut users = self.users.lock().await;
        if users.values().any(|existing| existing.email == user.email) {
            return Err(DatabaseError::Conflict("email already exists".to_owned()));
        }

        let now = Utc::now();
        let record = UserRecord {
            id: Uuid::now_v7(),
            first_name: user.first_name,
            last_name: user.last_name,
            email: user.email,
            phone: user.phone,
            role: user.role,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<UserRecord>, DatabaseError> {
        self.check()?;
        Ok(self.users.lock().await.get(&id).cloned())
    }

    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<UserRecord>, DatabaseError> {
        self.check()?;
        let users = self.users.lock().await;
        Ok(users
            .values()
            .filter(|user| ids.contains(&user.id))
            .cloned()
            .collect())
    }

    async fn list(&self) -> Result<Vec<UserRecord>, DatabaseError> {
        self.check()?;
        let mut users: Vec<UserRecord> = self.users.lock().await.values().cloned().collect();
        users.sort_by_key(|user| (user.created_at, user.id));
        Ok(users)
    }

    async fn update(
        &self,
        id: Uuid,
        update: UserUpdate,
    ) -> Result<Option<UserRecord>, DatabaseError> {
        self.check()?;
        let mut users = self.users.lock().await;
        let Some(user) = users.get_mut(&id) else {
            return Ok(None);
        };

        user.first_name = update.first_name;
        user.last_name = update.last_name;
        user.phone = update.phone;
        user.is_active = update.is_active;
        user.updated_at = Utc::now().max(user.updated_at + chrono::Duration::microseconds(1));
        Ok(Some(user.clone()))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DatabaseError> {
        self.check()?;
        Ok(self.users.lock().await.remove(&id).is_some())
    }
}
