use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: u64,
    pub username: String,
    pub password: String,
    pub role: String,
    pub department_id: Option<u64>,
    pub email: Option<String>,
    pub is_active: bool,
}
