//! Protocol state machines.
//!
//! Every protocol is a short exchange between an initiator and a responder:
//! the initiator locks the channel, computes the new channel value and its
//! commitments, signs them and sends the parameters plus its signatures. The
//! responder recomputes everything from the parameters, checks the
//! signatures, countersigns, persists and replies. The initiator persists
//! after it has the countersignatures. RejectInstall is one-way.
//!
//! The functions in the sub-modules are `impl` blocks on the shared
//! [Engine]: one for the initiator side, one (`respond_*`) for the responder.

mod context;
mod install;
mod propose;
mod reject;
mod setup;
mod sync;
mod take_action;
mod uninstall;

use serde::Serialize;

pub(crate) use context::Engine;
pub use crate::messages::ProtocolName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Initiator,
    Responder,
}

/// Where a protocol run currently is. Only ever moves forward, a run ends in
/// [Phase::Complete] or [Phase::Aborted].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Initiated,
    AwaitingCounterparty,
    Validating,
    Committing,
    Complete,
    Aborted,
}

impl Phase {
    pub fn is_final(self) -> bool {
        matches!(self, Phase::Complete | Phase::Aborted)
    }
}
