//! User roles and the canonical role → quota mapping.

use serde::{Deserialize, Serialize};

/// Role of the authenticated caller. Serialized as its numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Role {
    Anonym,
    RegisteredNotVerified,
    RegisteredVerified,
    Admin,
}

impl From<Role> for u8 {
    fn from(role: Role) -> u8 {
        match role {
            Role::Anonym => 0,
            Role::RegisteredNotVerified => 1,
            Role::RegisteredVerified => 2,
            Role::Admin => 3,
        }
    }
}

impl TryFrom<u8> for Role {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Role::Anonym),
            1 => Ok(Role::RegisteredNotVerified),
            2 => Ok(Role::RegisteredVerified),
            3 => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Usage quotas bound to a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quotas {
    pub prompt_length_max: u16,
    #[serde(rename = "rpm")]
    pub requests_per_minute: u16,
    #[serde(rename = "rpd")]
    pub requests_per_day: u16,
}

impl Role {
    /// Canonical quotas. This table is the single source of truth; access
    /// tokens embedding anything else are stale.
    pub fn quotas(self) -> Quotas {
        match self {
            Role::Anonym => Quotas {
                prompt_length_max: 100,
                requests_per_minute: 1,
                requests_per_day: 10,
            },
            Role::RegisteredNotVerified => Quotas {
                prompt_length_max: 300,
                requests_per_minute: 2,
                requests_per_day: 30,
            },
            Role::RegisteredVerified => Quotas {
                prompt_length_max: 1000,
                requests_per_minute: 5,
                requests_per_day: 100,
            },
            Role::Admin => Quotas {
                prompt_length_max: 4000,
                requests_per_minute: 60,
                requests_per_day: 10000,
            },
        }
    }
}
