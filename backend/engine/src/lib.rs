//! PairLink engine: pairings, sessions, authentication and expiry handling
//! over injected storage, crypto, relay and message-channel collaborators.

pub mod client;
pub mod context;
pub mod expiry;
pub mod pairing;
pub mod router;
pub mod sign;

#[cfg(test)]
mod testing;

pub use client::{Collaborators, SignClient};
pub use context::CoreContext;
pub use expiry::{ExpiryDispatcher, ExpiryOutcome};
pub use pairing::{format_uri, parse_uri, CreatedPairing, PairingManager, UriParameters};
pub use router::InboundRouter;
pub use sign::{
    Acknowledgement, ApproveData, ApproveParams, AuthenticateData, AuthenticateParams,
    AuthenticateResult, ConnectData, ConnectParams, SessionEngine, SessionEventHandler,
};
