use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::auth::principal::Principal;

const TOKEN_PREFIX: &str = "opaquelocktoken:";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

impl FromStr for Depth {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "0" | "zero" => Ok(Depth::Zero),
            "1" | "one" => Ok(Depth::One),
            "infinity" => Ok(Depth::Infinity),
            other => Err(anyhow::anyhow!("invalid lock depth '{}'", other)),
        }
    }
}

/// Advisory, timed, single-owner claim on a resource.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Lock {
    token: String,
    principal: Principal,
    owner_info: String,
    depth: Depth,
    timeout: DateTime<Utc>,
}

impl Lock {
    /// Create a lock with a freshly generated token.
    pub fn new(principal: Principal, owner_info: impl Into<String>, depth: Depth, timeout: DateTime<Utc>) -> Self {
        Self {
            token: format!("{}{}", TOKEN_PREFIX, Uuid::new_v4()),
            principal,
            owner_info: owner_info.into(),
            depth,
            timeout,
        }
    }

    /// Same token and owner, new owner info and expiry.
    pub fn refreshed(&self, owner_info: impl Into<String>, timeout: DateTime<Utc>) -> Self {
        Self {
            token: self.token.clone(),
            principal: self.principal.clone(),
            owner_info: owner_info.into(),
            depth: self.depth,
            timeout,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn owner_info(&self) -> &str {
        &self.owner_info
    }

    pub fn depth(&self) -> Depth {
        self.depth
    }

    pub fn timeout(&self) -> DateTime<Utc> {
        self.timeout
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.timeout <= now
    }
}
