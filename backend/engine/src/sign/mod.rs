//! Session negotiation, lifecycle and authentication.

pub mod auth;
mod engine;
mod handlers;
pub mod namespaces;
pub mod types;

pub use auth::{build_recap, find_recap, parse_did_pkh, verify_grants, Grants, Recap};
pub use engine::SessionEngine;
pub use types::{
    Acknowledgement, ApproveData, ApproveParams, AuthenticateData, AuthenticateParams,
    AuthenticateResult, ConnectData, ConnectParams, SessionEventHandler,
};
