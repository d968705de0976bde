//! Thread directory - the thread-identity collaborator
//!
//! Threads (conversations) are owned by the surrounding application. The engine
//! only needs to know that a thread exists and which [`ExecutionPolicy`] it uses.

use crate::permission::ExecutionPolicy;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Thread lookup used at admission time
#[async_trait]
pub trait ThreadDirectory: Send + Sync {
    /// Policy of an existing thread. Fails with `Error::ThreadNotFound` otherwise.
    async fn policy(&self, thread_id: &str) -> Result<ExecutionPolicy>;

    async fn exists(&self, thread_id: &str) -> bool {
        self.policy(thread_id).await.is_ok()
    }
}

/// In-process thread directory
#[derive(Debug, Default)]
pub struct InMemoryThreadDirectory {
    threads: RwLock<HashMap<String, ExecutionPolicy>>,
}

impl InMemoryThreadDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration
    pub fn with_thread(self, thread_id: impl Into<String>, policy: ExecutionPolicy) -> Self {
        self.insert(thread_id, policy);
        self
    }

    /// Register or replace a thread
    pub fn insert(&self, thread_id: impl Into<String>, policy: ExecutionPolicy) {
        self.threads.write().insert(thread_id.into(), policy);
    }

    /// Change the policy of an existing thread
    pub fn set_policy(&self, thread_id: &str, policy: ExecutionPolicy) -> Result<()> {
        let mut threads = self.threads.write();
        match threads.get_mut(thread_id) {
            Some(current) => {
                *current = policy;
                Ok(())
            }
            None => Err(Error::ThreadNotFound(thread_id.to_string())),
        }
    }

    pub fn remove(&self, thread_id: &str) -> Option<ExecutionPolicy> {
        self.threads.write().remove(thread_id)
    }

    pub fn len(&self) -> usize {
        self.threads.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.read().is_empty()
    }
}

#[async_trait]
impl ThreadDirectory for InMemoryThreadDirectory {
    async fn policy(&self, thread_id: &str) -> Result<ExecutionPolicy> {
        self.threads
            .read()
            .get(thread_id)
            .copied()
            .ok_or_else(|| Error::ThreadNotFound(thread_id.to_string()))
    }
}
