use bytes::Bytes;
use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::info;

use super::content::{self, checksum};
use super::Repository;
use crate::auth::manager::RepositoryAction;
use crate::error::{RepositoryError, Result};
use crate::path::Path;
use crate::resource::revision::{change_amount, Revision, RevisionType, WORKING_COPY_NAME};
use crate::resource::{Resource, ResourceId};

fn document_id(resource: &Resource) -> Result<ResourceId> {
    if resource.is_collection() {
        return Err(RepositoryError::illegal(format!(
            "{} is a collection and has no revisions",
            resource.uri()
        )));
    }
    resource
        .id()
        .ok_or_else(|| anyhow::anyhow!("{} has no id", resource.uri()).into())
}

fn find(revisions: &[Revision], revision_id: i64, uri: &Path) -> Result<Revision> {
    revisions
        .iter()
        .find(|r| r.id == revision_id)
        .cloned()
        .ok_or_else(|| RepositoryError::illegal(format!("{} has no revision {}", uri, revision_id)))
}

impl Repository {
    /// Revisions of the document at `uri`, newest first.
    pub async fn get_revisions(&self, token: Option<&str>, uri: &Path) -> Result<Vec<Revision>> {
        let resource = self.retrieve(token, uri, false).await?;
        let id = document_id(&resource)?;
        Ok(self.revisions.list(id).await?)
    }

    /// Snapshot the current content of `uri` as a new revision.
    pub async fn create_revision(&self, token: Option<&str>, uri: &Path, revision_type: RevisionType) -> Result<Revision> {
        let principal = self.principal(token).await;
        let resource = self.load_existing(uri).await?;
        let id = document_id(&resource)?;
        let principal = self.check_lock(&resource, principal.as_ref())?;
        let action = match revision_type {
            RevisionType::WorkingCopy => RepositoryAction::ReadWriteUnpublished,
            RevisionType::Regular => RepositoryAction::ReadWrite,
        };
        self.authz.authorize(action, &resource, Some(principal)).await?;

        let existing = self.revisions.list(id).await?;
        if revision_type == RevisionType::WorkingCopy && existing.iter().any(Revision::is_working_copy) {
            return Err(RepositoryError::illegal(format!("{} already has a working copy", uri)));
        }

        let content = self.content.get_content(uri).await?;
        let change = self.change_against_latest(id, &existing, &content).await?;
        let name = match revision_type {
            RevisionType::WorkingCopy => WORKING_COPY_NAME.to_string(),
            RevisionType::Regular => Revision::next_regular_name(&existing),
        };
        let revision = Revision {
            id: self.revisions.allocate_id().await?,
            name,
            revision_type,
            checksum: checksum(&content),
            change_amount: change,
            timestamp: Utc::now(),
            author: principal.clone(),
            acl: resource.acl().clone(),
        };
        self.revisions.create(id, &revision, content).await?;

        info!(uri = %uri, revision = %revision.name, by = %principal, "revision created");
        Ok(revision)
    }

    async fn change_against_latest(&self, id: ResourceId, existing: &[Revision], content: &[u8]) -> Result<Option<u32>> {
        let latest = existing.iter().find(|r| r.revision_type == RevisionType::Regular);
        match latest {
            Some(latest) => {
                let previous = self.revisions.content(id, latest).await?;
                Ok(Some(change_amount(&previous, content)))
            }
            None => Ok(None),
        }
    }

    /// Delete a revision. Removing a regular revision recomputes the change
    /// amount of the next newer regular revision.
    pub async fn delete_revision(&self, token: Option<&str>, uri: &Path, revision_id: i64) -> Result<()> {
        let principal = self.principal(token).await;
        let resource = self.load_existing(uri).await?;
        let id = document_id(&resource)?;
        let principal = self.check_lock(&resource, principal.as_ref())?;
        let existing = self.revisions.list(id).await?;
        let target = find(&existing, revision_id, uri)?;
        let action = if target.is_working_copy() {
            RepositoryAction::ReadWriteUnpublished
        } else {
            RepositoryAction::All
        };
        self.authz.authorize(action, &resource, Some(principal)).await?;

        let regular: Vec<&Revision> = existing
            .iter()
            .filter(|r| r.revision_type == RevisionType::Regular)
            .collect();
        let position = regular.iter().position(|r| r.id == revision_id);
        self.revisions.delete(id, &target).await?;

        if let Some(position) = position {
            let newer = position.checked_sub(1).and_then(|i| regular.get(i));
            let older = regular.get(position + 1);
            if let Some(newer) = newer {
                let mut newer = (*newer).clone();
                newer.change_amount = match older {
                    Some(older) => {
                        let old = self.revisions.content(id, older).await?;
                        let new = self.revisions.content(id, &newer).await?;
                        Some(change_amount(&old, &new))
                    }
                    None => None,
                };
                self.revisions.update(id, &newer).await?;
            }
        }

        info!(uri = %uri, revision = %target.name, by = %principal, "revision deleted");
        Ok(())
    }

    pub async fn get_revision_content(&self, token: Option<&str>, uri: &Path, revision_id: i64) -> Result<Bytes> {
        let resource = self.retrieve(token, uri, false).await?;
        let id = document_id(&resource)?;
        let revision = find(&self.revisions.list(id).await?, revision_id, uri)?;
        Ok(self.revisions.content(id, &revision).await?)
    }

    /// Replace the content of the working copy revision.
    pub async fn store_revision_content<R>(
        &self,
        token: Option<&str>,
        uri: &Path,
        revision_id: i64,
        content: R,
    ) -> Result<Revision>
    where
        R: AsyncRead + Send + Unpin,
    {
        let principal = self.principal(token).await;
        let resource = self.load_existing(uri).await?;
        let id = document_id(&resource)?;
        let principal = self.check_lock(&resource, principal.as_ref())?;
        self.authz
            .authorize(RepositoryAction::ReadWriteUnpublished, &resource, Some(principal))
            .await?;
        let existing = self.revisions.list(id).await?;
        let mut revision = find(&existing, revision_id, uri)?;
        if !revision.is_working_copy() {
            return Err(RepositoryError::illegal(format!(
                "revision {} of {} is not a working copy",
                revision.name, uri
            )));
        }

        let spooled = content::spool(content, self.spool_dir.as_deref()).await?;
        let mut bytes = Vec::with_capacity(spooled.length as usize);
        spooled.open().await?.read_to_end(&mut bytes).await?;

        revision.checksum = spooled.checksum.clone();
        revision.change_amount = self.change_against_latest(id, &existing, &bytes).await?;
        revision.timestamp = Utc::now();
        revision.author = principal.clone();
        self.revisions.store_content(id, &revision, Bytes::from(bytes)).await?;
        self.revisions.update(id, &revision).await?;

        info!(uri = %uri, revision = %revision.name, by = %principal, "working copy stored");
        Ok(revision)
    }
}
