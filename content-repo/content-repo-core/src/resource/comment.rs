use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::principal::Principal;
use crate::path::Path;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Comment {
    pub id: Uuid,
    pub uri: Path,
    pub author: Principal,
    pub time: DateTime<Utc>,
    pub title: Option<String>,
    pub content: String,
    pub approved: bool,
}

impl Comment {
    pub fn new(uri: Path, author: Principal, title: Option<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            uri,
            author,
            time: Utc::now(),
            title,
            content: content.into(),
            approved: true,
        }
    }
}
