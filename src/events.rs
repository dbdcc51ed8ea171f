//! Lifecycle events for external listeners.
//!
//! Events go through a `tokio::sync::broadcast` channel, so emitting never
//! blocks a protocol run. Slow subscribers lag and lose the oldest events.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use crate::{Address, Hash};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventName {
    CreateChannel,
    ProposeInstall,
    Install,
    RejectInstall,
    UpdateState,
    Uninstall,
    Sync,
    ProtocolMessage,
    SetupFailed,
    ProposeInstallFailed,
    InstallFailed,
    RejectInstallFailed,
    UpdateStateFailed,
    UninstallFailed,
    SyncFailed,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::CreateChannel => "CREATE_CHANNEL_EVENT",
            EventName::ProposeInstall => "PROPOSE_INSTALL_EVENT",
            EventName::Install => "INSTALL_EVENT",
            EventName::RejectInstall => "REJECT_INSTALL_EVENT",
            EventName::UpdateState => "UPDATE_STATE_EVENT",
            EventName::Uninstall => "UNINSTALL_EVENT",
            EventName::Sync => "SYNC_EVENT",
            EventName::ProtocolMessage => "PROTOCOL_MESSAGE_EVENT",
            EventName::SetupFailed => "SETUP_FAILED_EVENT",
            EventName::ProposeInstallFailed => "PROPOSE_INSTALL_FAILED_EVENT",
            EventName::InstallFailed => "INSTALL_FAILED_EVENT",
            EventName::RejectInstallFailed => "REJECT_INSTALL_FAILED_EVENT",
            EventName::UpdateStateFailed => "UPDATE_STATE_FAILED_EVENT",
            EventName::UninstallFailed => "UNINSTALL_FAILED_EVENT",
            EventName::SyncFailed => "SYNC_FAILED_EVENT",
        }
    }

    pub fn is_failure(&self) -> bool {
        self.as_str().ends_with("_FAILED_EVENT")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub name: EventName,
    pub multisig_address: Address,
    pub identity_hash: Option<Hash>,
    /// Version of the app (or free balance) the event refers to.
    pub version: Option<u64>,
    /// Set on `*_FAILED_EVENT`s.
    pub error: Option<String>,
    pub process_id: Uuid,
}

impl Event {
    pub fn new(name: EventName, multisig_address: Address, process_id: Uuid) -> Self {
        Self {
            name,
            multisig_address,
            identity_hash: None,
            version: None,
            error: None,
            process_id,
        }
    }

    pub fn app(mut self, identity_hash: Hash, version: u64) -> Self {
        self.identity_hash = Some(identity_hash);
        self.version = Some(version);
        self
    }

    pub fn failed(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn emit(&self, event: Event) {
        trace!(event = event.name.as_str(), multisig = %event.multisig_address, "emit");
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_the_event_convention() {
        assert_eq!(EventName::UpdateState.as_str(), "UPDATE_STATE_EVENT");
        assert!(EventName::UninstallFailed.is_failure());
        assert!(!EventName::Uninstall.is_failure());
    }

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let bus = EventBus::new(4);
        bus.emit(Event::new(EventName::Sync, Address::zero(), Uuid::nil()));

        let mut rx = bus.subscribe();
        let pid = Uuid::new_v4();
        bus.emit(Event::new(EventName::Install, Address([1; 20]), pid).app(Hash([2; 32]), 0));
        bus.emit(Event::new(EventName::InstallFailed, Address([1; 20]), pid).failed("boom"));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.name, EventName::Install);
        assert_eq!(first.version, Some(0));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.error.as_deref(), Some("boom"));
    }
}
