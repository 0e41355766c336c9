// Core data models

use crate::core::errors::CacheError;
use crate::state::cache::CacheFields;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Member,
    Entrepreneur,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Member => "member",
            UserRole::Entrepreneur => "entrepreneur",
            UserRole::Admin => "admin",
        }
    }

    /// Admin satisfies every role requirement
    pub fn satisfies(&self, required: UserRole) -> bool {
        *self == UserRole::Admin || *self == required
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "member" => Ok(UserRole::Member),
            "entrepreneur" => Ok(UserRole::Entrepreneur),
            "admin" => Ok(UserRole::Admin),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Persisted user record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub role: UserRole,
    pub is_active: bool,
    pub is_verified: bool,
    pub is_entrepreneur: bool,
    pub created_at: DateTime<Utc>,
}

/// Identity of the caller, attached to a request once the bearer token and
/// account state have been checked
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthenticatedIdentity {
    pub user_id: Uuid,
    pub email: String,
    pub role: UserRole,
    pub is_active: bool,
    pub is_verified: bool,
    pub is_entrepreneur: bool,
}

impl AuthenticatedIdentity {
    pub fn can_manage(&self, owner_id: Uuid) -> bool {
        self.user_id == owner_id || self.role == UserRole::Admin
    }
}

impl From<&User> for AuthenticatedIdentity {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            email: user.email.clone(),
            role: user.role,
            is_active: user.is_active,
            is_verified: user.is_verified,
            is_entrepreneur: user.is_entrepreneur,
        }
    }
}

/// Registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub full_name: String,
    #[serde(default)]
    pub is_entrepreneur: bool,
}

impl NewUser {
    pub fn validate(&self) -> Result<(), String> {
        let email = self.email.trim();
        if email.is_empty() || !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
            return Err("A valid email address is required".to_string());
        }
        if self.full_name.trim().is_empty() {
            return Err("Full name is required".to_string());
        }
        Ok(())
    }

    pub fn role(&self) -> UserRole {
        if self.is_entrepreneur {
            UserRole::Entrepreneur
        } else {
            UserRole::Member
        }
    }
}

/// Persisted business record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Business {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub category: String,
    pub city: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBusiness {
    pub name: String,
    pub category: String,
    pub city: String,
    #[serde(default)]
    pub description: String,
}

impl NewBusiness {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Business name is required".to_string());
        }
        if self.category.trim().is_empty() {
            return Err("Business category is required".to_string());
        }
        Ok(())
    }
}

/// Partial update; absent fields are left unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusinessUpdate {
    pub name: Option<String>,
    pub category: Option<String>,
    pub city: Option<String>,
    pub description: Option<String>,
}

impl BusinessUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.category.is_none() && self.city.is_none() && self.description.is_none()
    }

    pub fn apply(&self, business: &mut Business) {
        if let Some(ref name) = self.name {
            business.name = name.clone();
        }
        if let Some(ref category) = self.category {
            business.category = category.clone();
        }
        if let Some(ref city) = self.city {
            business.city = city.clone();
        }
        if let Some(ref description) = self.description {
            business.description = description.clone();
        }
    }
}

/// Listing filter. Also the input of the list-cache key hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessFilter {
    pub category: Option<String>,
    pub city: Option<String>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    20
}

impl Default for BusinessFilter {
    fn default() -> Self {
        Self {
            category: None,
            city: None,
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

impl BusinessFilter {
    pub const MAX_PER_PAGE: u32 = 100;

    /// Clamp paging into the supported range. Blank filters mean no filter.
    pub fn normalized(mut self) -> Self {
        self.category = self.category.filter(|value| !value.trim().is_empty());
        self.city = self.city.filter(|value| !value.trim().is_empty());
        self.page = self.page.max(1);
        self.per_page = self.per_page.clamp(1, Self::MAX_PER_PAGE);
        self
    }

    pub fn offset(&self) -> i64 {
        (self.page.saturating_sub(1) as i64) * self.per_page as i64
    }

    /// Stable fingerprint used to address a cached listing
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        for field in [&self.category, &self.city] {
            // Presence tag keeps None and Some("") apart
            match field {
                Some(value) => {
                    hasher.update([1u8]);
                    hasher.update(value.as_bytes());
                }
                None => hasher.update([0u8]),
            }
            hasher.update([0u8]);
        }
        hasher.update(self.page.to_be_bytes());
        hasher.update(self.per_page.to_be_bytes());
        hex::encode(hasher.finalize())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
}

/// Email notification carried on the notifications queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailNotification {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub template_name: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Access + refresh token pair handed to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: u64,
}

impl CacheFields for Business {
    fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            ("id".to_string(), self.id.to_string()),
            ("owner_id".to_string(), self.owner_id.to_string()),
            ("name".to_string(), self.name.clone()),
            ("category".to_string(), self.category.clone()),
            ("city".to_string(), self.city.clone()),
            ("description".to_string(), self.description.clone()),
            ("created_at".to_string(), self.created_at.timestamp_millis().to_string()),
            ("updated_at".to_string(), self.updated_at.timestamp_millis().to_string()),
        ]
    }

    fn from_fields(fields: &[(String, String)]) -> Result<Self, CacheError> {
        let get = |name: &str| -> Result<&str, CacheError> {
            fields
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
                .ok_or_else(|| CacheError::Decode(format!("missing field '{}'", name)))
        };
        let parse_uuid = |name: &str| -> Result<Uuid, CacheError> {
            Uuid::parse_str(get(name)?).map_err(|e| CacheError::Decode(format!("{}: {}", name, e)))
        };
        let parse_millis = |name: &str| -> Result<DateTime<Utc>, CacheError> {
            let millis: i64 = get(name)?
                .parse()
                .map_err(|e| CacheError::Decode(format!("{}: {}", name, e)))?;
            Utc.timestamp_millis_opt(millis)
                .single()
                .ok_or_else(|| CacheError::Decode(format!("{}: out of range", name)))
        };

        Ok(Business {
            id: parse_uuid("id")?,
            owner_id: parse_uuid("owner_id")?,
            name: get("name")?.to_string(),
            category: get("category")?.to_string(),
            city: get("city")?.to_string(),
            description: get("description")?.to_string(),
            created_at: parse_millis("created_at")?,
            updated_at: parse_millis("updated_at")?,
        })
    }
}
