use std::sync::Mutex;

use super::InstanceKey;
use crate::core::{ObjectId, Result};

struct Staged {
    key: InstanceKey,
    identity: Option<(String, ObjectId)>,
}

/// Instances created by one load, not yet visible through the identity map
///
/// A load stages every instance it creates. Lookups made by the same load see
/// staged identities, so reference cycles close on the staged instance. Other
/// loads only see published identities. [`ObjectGraph::publish`] makes the
/// whole set visible at once; [`ObjectGraph::rollback`] discards a suffix.
///
/// [`ObjectGraph::publish`]: super::ObjectGraph::publish
/// [`ObjectGraph::rollback`]: super::ObjectGraph::rollback
#[derive(Default)]
pub struct HydrationScope {
    staged: Mutex<Vec<Staged>>,
}

impl HydrationScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, class_name: &str, id: &str) -> Result<Option<InstanceKey>> {
        Ok(self
            .staged
            .lock()?
            .iter()
            .find(|s| {
                s.identity
                    .as_ref()
                    .is_some_and(|(class, staged_id)| class == class_name && staged_id == id)
            })
            .map(|s| s.key))
    }

    pub(crate) fn stage(&self, key: InstanceKey, identity: Option<(String, ObjectId)>) -> Result<()> {
        self.staged.lock()?.push(Staged { key, identity });
        Ok(())
    }

    /// Savepoint for [`ObjectGraph::rollback`](super::ObjectGraph::rollback)
    pub fn mark(&self) -> Result<usize> {
        Ok(self.staged.lock()?.len())
    }

    pub fn len(&self) -> usize {
        self.staged.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn take_since(&self, mark: usize) -> Result<Vec<InstanceKey>> {
        let mut staged = self.staged.lock()?;
        let mark = mark.min(staged.len());
        Ok(staged.drain(mark..).map(|s| s.key).collect())
    }

    pub(crate) fn take_all(&self) -> Result<Vec<(InstanceKey, Option<(String, ObjectId)>)>> {
        Ok(self
            .staged
            .lock()?
            .drain(..)
            .map(|s| (s.key, s.identity))
            .collect())
    }
}
