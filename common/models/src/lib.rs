//! Records served by the internal catalog endpoints and the change events published when
//! they are updated.
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use common_catalog::CatalogEntity;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Channel carrying `ProductChange` events, consumed by the order service.
pub const PRODUCT_UPDATES: &str = "product-updates";
/// Channel carrying `UserChange` events, consumed by the product service.
pub const USER_UPDATES: &str = "user-updates";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    User,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::User => "user",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct UnknownUserRole(pub String);

impl fmt::Display for UnknownUserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is not a valid user role", self.0)
    }
}

impl std::error::Error for UnknownUserRole {}

impl FromStr for UserRole {
    type Err = UnknownUserRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(UserRole::Admin),
            "user" => Ok(UserRole::User),
            invalid => Err(UnknownUserRole(invalid.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub role: UserRole,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

impl CatalogEntity for UserRecord {
    const KIND: &'static str = "user";

    fn entity_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Active,
    Inactive,
    OutOfStock,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Active => "active",
            ProductStatus::Inactive => "inactive",
            ProductStatus::OutOfStock => "out_of_stock",
        }
    }
}

impl fmt::Display for ProductStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct UnknownProductStatus(pub String);

impl fmt::Display for UnknownProductStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is not a valid product status", self.0)
    }
}

impl std::error::Error for UnknownProductStatus {}

impl FromStr for ProductStatus {
    type Err = UnknownProductStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ProductStatus::Active),
            "inactive" => Ok(ProductStatus::Inactive),
            "out_of_stock" => Ok(ProductStatus::OutOfStock),
            invalid => Err(UnknownProductStatus(invalid.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub quantity: i32,
    pub status: ProductStatus,
    pub owner_id: Uuid,
    pub owner_name: String,
    pub owner_phone: String,
    pub owner_email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CatalogEntity for ProductRecord {
    const KIND: &'static str = "product";

    fn entity_id(&self) -> Uuid {
        self.id
    }
}

/// Snapshot of a product after a committed update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductChange {
    #[serde(flatten)]
    pub product: ProductRecord,
    /// The name changed, so denormalized copies of it are stale.
    pub name_is_updated: bool,
}

/// Snapshot of a user after a committed update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserChange {
    #[serde(flatten)]
    pub user: UserRecord,
    /// Name, phone or email changed, so copies held on products are stale.
    pub contact_is_updated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn product() -> ProductRecord {
        ProductRecord {
            id: Uuid::now_v7(),
            name: "Desk lamp".to_owned(),
            description: "Brass, 40cm".to_owned(),
            price: 34.5,
            quantity: 12,
            status: ProductStatus::Active,
            owner_id: Uuid::now_v7(),
            owner_name: "Ada Lovelace".to_owned(),
            owner_phone: "+44 20 7946 0000".to_owned(),
            owner_email: "ada@example.com".to_owned(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn product_change_round_trips_with_flag() {
        for name_is_updated in [true, false] {
            let change = ProductChange {
                product: product(),
                name_is_updated,
            };

            let bytes = serde_json::to_vec(&change).unwrap();
            let decoded: ProductChange = serde_json::from_slice(&bytes).unwrap();

            assert_eq!(decoded, change);
        }
    }

    #[test]
    fn product_change_is_flat_on_the_wire() {
        let change = ProductChange {
            product: product(),
            name_is_updated: true,
        };

        let value = serde_json::to_value(&change).unwrap();

        assert_eq!(value["name_is_updated"], json!(true));
        assert_eq!(value["name"], json!("Desk lamp"));
        assert_eq!(value["status"], json!("active"));
    }

    #[test]
    fn user_change_round_trips() {
        let change = UserChange {
            user: UserRecord {
                id: Uuid::now_v7(),
                first_name: "Grace".to_owned(),
                last_name: "Hopper".to_owned(),
                email: "grace@example.com".to_owned(),
                phone: "555-0100".to_owned(),
                role: UserRole::User,
                is_active: true,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            contact_is_updated: true,
        };

        let decoded: UserChange =
            serde_json::from_slice(&serde_json::to_vec(&change).unwrap()).unwrap();

        assert_eq!(decoded, change);
        assert_eq!(decoded.user.full_name(), "Grace Hopper");
    }

    #[test]
    fn user_role_parses() {
        assert_eq!("admin".parse(), Ok(UserRole::Admin));
        assert_eq!(UserRole::User.as_str(), "user");
        assert!("root".parse::<UserRole>().is_err());
    }

    #[test]
    fn product_status_parses() {
        assert_eq!("out_of_stock".parse(), Ok(ProductStatus::OutOfStock));
        assert!("sold".parse::<ProductStatus>().is_err());
    }
}
