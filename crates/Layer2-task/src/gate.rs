//! Permission Gate - destructive command admission
//!
//! | policy           | non-destructive | destructive                 |
//! |------------------|-----------------|-----------------------------|
//! | `safe`           | allow           | deny                        |
//! | `normal`         | allow           | allow                       |
//! | `danger-confirm` | allow           | allow only when confirmed   |
//!
//! The gate runs before anything is created, so a rejection has no side effects.

use deskrun_foundation::{
    CommandClassifier, DestructiveMatch, Error, ExecutionPolicy, PatternClassifier, Result,
    ThreadDirectory,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Gate decision for one submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Admit the command
    Allow,
    /// Destructive command on a `danger-confirm` thread without confirmation
    RequiresConfirmation(String),
    /// Destructive command on a `safe` thread
    Deny(String),
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allow)
    }
}

pub struct PermissionGate {
    threads: Arc<dyn ThreadDirectory>,

    classifier: Arc<dyn CommandClassifier>,
}

impl PermissionGate {
    /// Gate with the default pattern classifier
    pub fn new(threads: Arc<dyn ThreadDirectory>) -> Self {
        Self {
            threads,
            classifier: Arc::new(PatternClassifier::new()),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn CommandClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn classifier(&self) -> &Arc<dyn CommandClassifier> {
        &self.classifier
    }

    /// Policy table applied to a classification result
    pub fn evaluate(
        policy: ExecutionPolicy,
        destructive: Option<&DestructiveMatch>,
        confirm_destructive: bool,
    ) -> GateDecision {
        let Some(found) = destructive else {
            return GateDecision::Allow;
        };

        match policy {
            ExecutionPolicy::Normal => GateDecision::Allow,
            ExecutionPolicy::Safe => GateDecision::Deny(found.reason()),
            ExecutionPolicy::DangerConfirm if confirm_destructive => GateDecision::Allow,
            ExecutionPolicy::DangerConfirm => GateDecision::RequiresConfirmation(found.reason()),
        }
    }

    /// Classify and decide for a known policy
    pub fn check(
        &self,
        policy: ExecutionPolicy,
        command: &str,
        confirm_destructive: bool,
    ) -> GateDecision {
        let destructive = self.classifier.classify(command);
        Self::evaluate(policy, destructive.as_ref(), confirm_destructive)
    }

    /// Look up the thread and admit or reject the command
    pub async fn admit(&self, thread_id: &str, command: &str, confirm_destructive: bool) -> Result<()> {
        let policy = self.threads.policy(thread_id).await?;

        match self.check(policy, command, confirm_destructive) {
            GateDecision::Allow => {
                debug!("Admitted command on thread {} ({})", thread_id, policy);
                Ok(())
            }
            GateDecision::RequiresConfirmation(reason) => {
                info!("Confirmation required on thread {}: {}", thread_id, reason);
                Err(Error::permission_required(thread_id, reason))
            }
            GateDecision::Deny(reason) => {
                info!("Denied on safe thread {}: {}", thread_id, reason);
                Err(Error::permission_denied(thread_id, reason))
            }
        }
    }
}
