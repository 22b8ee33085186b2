//! Top-level owner of every tracker for one account

use std::sync::Arc;

use tracing::info;

use crate::call::{Call, CallDirection, CallId};
use crate::conference::ConferenceDescriptionCache;
use crate::config::LifecycleConfig;
use crate::errors::Result;
use crate::file_transfer::{FileTransfer, TransferDirection, TransferId};
use crate::messaging::MessageDispatcher;
use crate::repository::{ActiveCallsRepository, ActiveFileTransfers, RepositoryStats};
use crate::transform::TransformPipeline;

/// Counters across the coordinator's repositories
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub calls: RepositoryStats,
    pub file_transfers: RepositoryStats,
    pub cached_conferences: usize,
}

/// Owns the call and file transfer repositories, the conference cache and
/// the message dispatcher, all configured from one [`LifecycleConfig`]
#[derive(Debug)]
pub struct LifecycleCoordinator {
    config: LifecycleConfig,
    calls: ActiveCallsRepository,
    file_transfers: ActiveFileTransfers,
    conferences: Arc<ConferenceDescriptionCache>,
    messages: Arc<MessageDispatcher>,
}

impl LifecycleCoordinator {
    /// Validate `config` and build empty trackers
    pub fn new(config: LifecycleConfig) -> Result<Self> {
        config.validate()?;

        let pipeline = Arc::new(TransformPipeline::with_default_priority(
            config.default_transform_priority,
        ));
        info!(
            policy = ?config.transition_policy,
            transform_priority = config.default_transform_priority,
            "Lifecycle coordinator created"
        );

        Ok(Self {
            calls: ActiveCallsRepository::new("active-calls"),
            file_transfers: ActiveFileTransfers::new("active-file-transfers"),
            conferences: Arc::new(ConferenceDescriptionCache::new()),
            messages: Arc::new(MessageDispatcher::new(pipeline)),
            config,
        })
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn calls(&self) -> &ActiveCallsRepository {
        &self.calls
    }

    pub fn file_transfers(&self) -> &ActiveFileTransfers {
        &self.file_transfers
    }

    pub fn conferences(&self) -> &Arc<ConferenceDescriptionCache> {
        &self.conferences
    }

    pub fn messages(&self) -> &Arc<MessageDispatcher> {
        &self.messages
    }

    /// Message transform pipeline shared with the dispatcher
    pub fn pipeline(&self) -> &Arc<TransformPipeline> {
        self.messages.pipeline()
    }

    /// Create a call with a fresh id and start tracking it
    pub fn create_call(&self, direction: CallDirection) -> Result<Arc<Call>> {
        self.create_call_with_id(CallId::new(), direction)
    }

    /// Create a call with a protocol-assigned id and start tracking it
    pub fn create_call_with_id(&self, id: CallId, direction: CallDirection) -> Result<Arc<Call>> {
        let call = Arc::new(Call::with_policy(id.clone(), direction, self.config.transition_policy));
        self.calls.add(id, Arc::clone(&call))?;
        Ok(call)
    }

    /// Create a file transfer and start tracking it
    pub fn create_file_transfer(
        &self,
        id: TransferId,
        direction: TransferDirection,
        file_name: impl Into<String>,
        file_size: Option<u64>,
    ) -> Result<Arc<FileTransfer>> {
        let transfer = Arc::new(FileTransfer::with_policy(
            id.clone(),
            direction,
            file_name,
            file_size,
            self.config.transition_policy,
        ));
        self.file_transfers.add(id, Arc::clone(&transfer))?;
        Ok(transfer)
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            calls: self.calls.stats(),
            file_transfers: self.file_transfers.stats(),
            cached_conferences: self.conferences.cached_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallState;
    use crate::errors::LifecycleError;
    use crate::state::TransitionPolicy;

    #[test]
    fn test_created_entities_are_tracked_until_terminal() {
        let coordinator = LifecycleCoordinator::new(LifecycleConfig::default()).unwrap();

        let call = coordinator.create_call(CallDirection::Outgoing).unwrap();
        let transfer = coordinator
            .create_file_transfer(TransferId::from("ft"), TransferDirection::Outgoing, "a.txt", None)
            .unwrap();
        assert_eq!(coordinator.calls().count(), 1);
        assert_eq!(coordinator.file_transfers().count(), 1);

        call.set_state(CallState::Ended).unwrap();
        transfer.set_status(crate::file_transfer::FileTransferStatus::Declined, None).unwrap();

        let stats = coordinator.stats();
        assert_eq!(stats.calls.active, 0);
        assert_eq!(stats.calls.total_ended, 1);
        assert_eq!(stats.file_transfers.total_ended, 1);
    }

    #[test]
    fn test_configured_policy_reaches_entities() {
        let config = LifecycleConfig::default().with_transition_policy(TransitionPolicy::Strict);
        let coordinator = LifecycleCoordinator::new(config).unwrap();

        let call = coordinator.create_call(CallDirection::Incoming).unwrap();
        assert_eq!(call.lifecycle().policy(), TransitionPolicy::Strict);
    }

    #[test]
    fn test_duplicate_call_id_is_rejected() {
        let coordinator = LifecycleCoordinator::new(LifecycleConfig::default()).unwrap();
        coordinator
            .create_call_with_id(CallId::from("dup"), CallDirection::Incoming)
            .unwrap();

        let err = coordinator
            .create_call_with_id(CallId::from("dup"), CallDirection::Incoming)
            .unwrap_err();
        assert!(matches!(err, LifecycleError::DuplicateEntity { .. }));
    }

    #[test]
    fn test_configured_priority_reaches_pipeline() {
        let config = LifecycleConfig::default().with_default_transform_priority(9);
        let coordinator = LifecycleCoordinator::new(config).unwrap();
        assert_eq!(coordinator.pipeline().default_priority(), 9);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = LifecycleConfig::default().with_log_level("noisy");
        assert!(LifecycleCoordinator::new(config).is_err());
    }
}
