pub mod bus;
pub mod clock;
pub mod correlator;
pub mod error;
pub mod event;
pub mod expiry;
pub mod locks;
pub mod message;
pub mod mock;
pub mod traits;
pub mod types;
pub mod verify;

pub use bus::{BusEvent, EventBus, ListenerHandle, DEFAULT_BUS_CAPACITY};
pub use correlator::{PendingResponse, RequestCorrelator};
pub use error::{ErrorReason, PairLinkError, Result};
pub use event::{PairingEvent, PairingEventKind, SessionEvent, SessionEventKind};
pub use expiry::ExpiryTarget;
pub use locks::TopicLocks;
pub use message::{
    AuthenticateResponse, EmptyParams, EventData, Method, RequestParams, RpcOutcome, RpcRequest,
    RpcResponse, SessionAuthenticateParams, SessionEventParams, SessionProposeParams,
    SessionProposeResponse, SessionSettleParams, SessionUpdateParams,
};
pub use traits::{
    CacaoVerifier, Crypto, ExpiryScheduler, HandlerToken, InboundHandler, MessageChannel, Relay,
    Store,
};
pub use types::{
    AuthPayload, Cacao, CacaoHeader, CacaoPayload, CacaoSignature, Metadata, Namespace,
    Namespaces, Pairing, PairingPatch, Participant, PendingAuthRequest, Proposal, ProposalNamespace,
    ProposalPatch, Record, RelayProtocolOptions, RequiredNamespaces, Session, SessionPatch,
    SessionProperties, Validation, VerifyContext,
};
