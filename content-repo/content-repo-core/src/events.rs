use serde::Serialize;
use tokio::sync::broadcast;

use crate::auth::principal::Principal;
use crate::path::Path;
use crate::resource::Resource;

/// Change notifications published after a mutation has been persisted.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum RepositoryEvent {
    Created {
        resource: Resource,
        by: Option<Principal>,
    },
    ContentModified {
        resource: Resource,
        by: Option<Principal>,
    },
    PropertiesModified {
        before: Resource,
        after: Resource,
        by: Option<Principal>,
    },
    Deleted {
        uri: Path,
        resource: Resource,
        by: Option<Principal>,
    },
    AclModified {
        before: Resource,
        after: Resource,
        by: Option<Principal>,
    },
}

impl RepositoryEvent {
    /// Path the event is about, after the change.
    pub fn uri(&self) -> &Path {
        match self {
            RepositoryEvent::Created { resource, .. }
            | RepositoryEvent::ContentModified { resource, .. } => resource.uri(),
            RepositoryEvent::PropertiesModified { after, .. }
            | RepositoryEvent::AclModified { after, .. } => after.uri(),
            RepositoryEvent::Deleted { uri, .. } => uri,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RepositoryEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RepositoryEvent> {
        self.tx.subscribe()
    }

    /// Fire and forget; events without subscribers are dropped.
    pub fn send(&self, event: RepositoryEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
