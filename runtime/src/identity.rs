//! The signed-in owner, as reported by the host's auth layer.

use fitsync_engine::OwnerId;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct Identity {
    owner: Arc<watch::Sender<Option<OwnerId>>>,
}

impl Default for Identity {
    fn default() -> Self {
        Self::new()
    }
}

impl Identity {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { owner: Arc::new(tx) }
    }

    pub fn current_owner_id(&self) -> Option<OwnerId> {
        self.owner.borrow().clone()
    }

    /// Signing in as the current owner again is not a change.
    pub fn sign_in(&self, owner_id: impl Into<OwnerId>) {
        let owner_id = owner_id.into();
        self.owner.send_if_modified(|current| {
            if current.as_ref() == Some(&owner_id) {
                false
            } else {
                *current = Some(owner_id);
                true
            }
        });
    }

    pub fn sign_out(&self) {
        self.owner.send_if_modified(|current| current.take().is_some());
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<OwnerId>> {
        self.owner.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_in_and_out() {
        let identity = Identity::new();
        let mut rx = identity.subscribe();
        assert_eq!(identity.current_owner_id(), None);

        identity.sign_in("u1");
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().as_deref(), Some("u1"));

        identity.sign_in("u1");
        assert!(!rx.has_changed().unwrap());

        identity.sign_out();
        assert!(rx.has_changed().unwrap());
        assert_eq!(identity.current_owner_id(), None);
    }
}
