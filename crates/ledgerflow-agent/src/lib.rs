//! Call transport and dispatch for ledgerflow.
//!
//! This crate owns everything between a typed method call and the network:
//!
//! - [`identity`]: signing identities (anonymous and ed25519) and the sender
//!   principal they imply.
//! - [`request`]: canonical request envelopes, their content-addressed
//!   [`RequestId`](ledgerflow_core::RequestId)s, and the CBOR wire shapes of
//!   requests and responses.
//! - [`transport`]: the [`Transport`] seam plus the production HTTP
//!   implementation.
//! - [`agent`]: the [`Agent`] — single-shot queries, update calls, and the
//!   prepare/commit split that yields a request id before the round trip
//!   completes, with certificate-driven polling for completion.
//! - [`dispatch`]: the per-method [`MethodSpec`] table and typed
//!   encode/dispatch/decode helpers.
//! - [`interceptor`]: the composable call-wrapping chain with error
//!   classification and exponential-backoff retry for transient failures.

#![forbid(unsafe_code)]

pub mod agent;
pub mod dispatch;
pub mod identity;
pub mod interceptor;
pub mod poll;
pub mod request;
pub mod transport;

pub use agent::{Agent, AgentConfig, PreparedCall, TimestampedReply};
pub use dispatch::{dispatch_update, prepare_update, resume_update, CallMode, MethodSpec, PreparedUpdate};
pub use identity::{AnonymousIdentity, Ed25519Identity, Identity, IdentitySignature};
pub use interceptor::{
    CallFn, CallInterceptor, ClassifyInterceptor, InterceptorChain, RetryConfig, RetryInterceptor,
    RetryObserver,
};
pub use poll::{ExponentialPoll, PollStrategy};
pub use request::{
    Envelope, EnvelopeContent, NodeSignatureWire, QueryReplyWire, QueryResponseWire,
    ReadStateResponseWire,
};
pub use transport::{HttpTransport, Transport, TransportResponse};
