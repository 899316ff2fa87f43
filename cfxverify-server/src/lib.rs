//! Asynchronous contract verification service.
//!
//! Turns a synchronous compile-and-match operation into idempotent,
//! worker-executed jobs: submissions pass an atomic admission check in the
//! [`JobLedger`] (duplicate and already-verified targets are rejected before
//! any work is scheduled), get queued by the [`WorkerDispatcher`] and return
//! a job id immediately. A fixed worker pool runs the
//! [`ContractVerifier`](pipeline::ContractVerifier) pipeline under a timeout
//! budget and records terminal outcomes back into the ledger; terminal
//! states are never overwritten.
//!
//! HTTP framing, request parsing and field validation are the embedding
//! server's business; [`VerificationService`] is the boundary this crate
//! exposes to it.

#![deny(rustdoc::broken_intra_doc_links)]

pub mod chains;
pub mod dispatcher;
mod error;
pub mod job;
pub mod ledger;
pub mod pipeline;
pub mod service;

pub use chains::{Chain, ChainMap};
pub use dispatcher::{DispatcherConfig, Verifier, WorkerDispatcher};
pub use error::{Result, ServerError};
pub use job::{JobKey, JobStatus, VerificationJob};
pub use ledger::JobLedger;
pub use pipeline::{
    BytecodeComparator, ContractVerifier, MatchOutcome, RecompiledContract, VerificationPayload,
};
pub use service::{VerificationService, VerifyFromJsonInput};
