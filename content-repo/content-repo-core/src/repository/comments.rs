use tracing::debug;
use uuid::Uuid;

use super::Repository;
use crate::auth::manager::RepositoryAction;
use crate::error::{RepositoryError, Result};
use crate::path::Path;
use crate::resource::comment::Comment;

impl Repository {
    pub async fn get_comments(&self, token: Option<&str>, uri: &Path) -> Result<Vec<Comment>> {
        self.retrieve(token, uri, false).await?;
        Ok(self.dao.load_comments(uri).await?)
    }

    pub async fn add_comment(
        &self,
        token: Option<&str>,
        uri: &Path,
        title: Option<String>,
        text: &str,
    ) -> Result<Comment> {
        let principal = self.principal(token).await;
        let resource = self.load_existing(uri).await?;
        let principal = principal.ok_or(RepositoryError::Unauthenticated)?;
        self.authz
            .authorize(RepositoryAction::AddComment, &resource, Some(&principal))
            .await?;
        let count = self.dao.load_comments(uri).await?.len();
        if count >= self.config.max_comments {
            return Err(RepositoryError::illegal(format!(
                "{} already has the maximum of {} comments",
                uri, self.config.max_comments
            )));
        }
        let comment = self
            .dao
            .store_comment(Comment::new(uri.clone(), principal, title, text))
            .await?;
        debug!(uri = %uri, comment = %comment.id, "comment added");
        Ok(comment)
    }

    async fn existing_comment(&self, uri: &Path, id: Uuid) -> Result<Comment> {
        self.dao
            .load_comments(uri)
            .await?
            .into_iter()
            .find(|c| c.id == id)
            .ok_or_else(|| RepositoryError::illegal(format!("{} has no comment {}", uri, id)))
    }

    /// Replace the title, text and approval of an existing comment.
    pub async fn update_comment(&self, token: Option<&str>, uri: &Path, comment: &Comment) -> Result<Comment> {
        let principal = self.principal(token).await;
        let resource = self.load_existing(uri).await?;
        self.authz
            .authorize(RepositoryAction::EditComment, &resource, principal.as_ref())
            .await?;
        let mut stored = self.existing_comment(uri, comment.id).await?;
        stored.title = comment.title.clone();
        stored.content = comment.content.clone();
        stored.approved = comment.approved;
        Ok(self.dao.store_comment(stored).await?)
    }

    pub async fn delete_comment(&self, token: Option<&str>, uri: &Path, id: Uuid) -> Result<()> {
        let principal = self.principal(token).await;
        let resource = self.load_existing(uri).await?;
        self.authz
            .authorize(RepositoryAction::EditComment, &resource, principal.as_ref())
            .await?;
        let comment = self.existing_comment(uri, id).await?;
        self.dao.delete_comment(&comment).await?;
        Ok(())
    }

    pub async fn delete_all_comments(&self, token: Option<&str>, uri: &Path) -> Result<()> {
        let principal = self.principal(token).await;
        let resource = self.load_existing(uri).await?;
        self.authz
            .authorize(RepositoryAction::EditComment, &resource, principal.as_ref())
            .await?;
        self.dao.delete_all_comments(uri).await?;
        Ok(())
    }
}
