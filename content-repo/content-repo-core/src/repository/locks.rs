use chrono::{DateTime, Duration, Utc};
use tracing::info;

use super::Repository;
use crate::auth::manager::RepositoryAction;
use crate::error::{RepositoryError, Result};
use crate::events::RepositoryEvent;
use crate::path::Path;
use crate::resource::lock::{Depth, Lock};

impl Repository {
    /// Take a new lock on `uri`, or refresh the current one when
    /// `refresh_token` is given.
    ///
    /// A requested timeout above the configured maximum falls back to the
    /// default timeout.
    pub async fn lock(
        &self,
        token: Option<&str>,
        uri: &Path,
        owner_info: &str,
        depth: Depth,
        requested_timeout_secs: Option<u64>,
        refresh_token: Option<&str>,
    ) -> Result<Lock> {
        if depth != Depth::Zero {
            return Err(RepositoryError::illegal(format!("unsupported lock depth {:?}", depth)));
        }
        let principal = self.principal(token).await;
        let mut resource = self.load_existing(uri).await?;
        let principal = self.check_lock(&resource, principal.as_ref())?;
        self.authz
            .authorize(Self::write_action(&resource), &resource, Some(principal))
            .await?;

        let now = Utc::now();
        let timeout = requested_timeout_secs
            .filter(|secs| *secs <= self.config.lock_max_timeout_secs)
            .unwrap_or(self.config.lock_default_timeout_secs);
        let expires = i64::try_from(timeout)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|span| now.checked_add_signed(span))
            .ok_or_else(|| RepositoryError::illegal(format!("lock timeout of {}s is out of range", timeout)))?;

        let lock = match refresh_token {
            Some(refresh) => match resource.active_lock(now) {
                Some(current) if current.token() == refresh => current.refreshed(owner_info, expires),
                _ => {
                    return Err(RepositoryError::illegal(format!(
                        "lock token does not match the lock on {}",
                        uri
                    )))
                }
            },
            None => Lock::new(principal.clone(), owner_info, depth, expires),
        };
        let before = resource.clone();
        resource.set_lock(Some(lock.clone()));
        let after = self.dao.store(resource).await?;
        self.events.send(RepositoryEvent::PropertiesModified {
            before,
            after,
            by: Some(principal.clone()),
        });

        info!(uri = %uri, by = %principal, timeout_secs = timeout, refresh = refresh_token.is_some(), "resource locked");
        Ok(lock)
    }

    /// Release the lock on `uri`. When `lock_token` is given it must match
    /// the current lock.
    pub async fn unlock(&self, token: Option<&str>, uri: &Path, lock_token: Option<&str>) -> Result<()> {
        let principal = self.principal(token).await;
        let mut resource = self.load_existing(uri).await?;
        let principal = principal.as_ref().ok_or(RepositoryError::Unauthenticated)?;
        self.authz
            .authorize(RepositoryAction::Unlock, &resource, Some(principal))
            .await?;

        let Some(current) = resource.lock() else {
            return Ok(());
        };
        if let Some(expected) = lock_token {
            if current.token() != expected {
                return Err(RepositoryError::illegal(format!(
                    "lock token does not match the lock on {}",
                    uri
                )));
            }
        }
        let before = resource.clone();
        resource.set_lock(None);
        let after = self.dao.store(resource).await?;
        self.events.send(RepositoryEvent::PropertiesModified {
            before,
            after,
            by: Some(principal.clone()),
        });
        info!(uri = %uri, by = %principal, "resource unlocked");
        Ok(())
    }

    /// Drop every lock expired at `now`.
    pub async fn expire_locks(&self, now: DateTime<Utc>) -> Result<usize> {
        Ok(self.dao.delete_expired_locks(now).await?)
    }
}
