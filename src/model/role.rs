use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Role tag carried by every session.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Role {
    Admin,
    Manager,
    Doer,
    Client,
}

impl Role {
    pub fn is_admin(self) -> bool {
        self == Role::Admin
    }

    /// Roles that can see beyond their own rows.
    pub fn is_privileged(self) -> bool {
        matches!(self, Role::Admin | Role::Manager)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn parses_stored_role_tags() {
        assert_eq!(Role::from_str("admin").unwrap(), Role::Admin);
        assert_eq!(Role::from_str("Manager").unwrap(), Role::Manager);
        assert!(Role::from_str("superuser").is_err());
        assert_eq!(Role::Doer.to_string(), "doer");
    }
}
