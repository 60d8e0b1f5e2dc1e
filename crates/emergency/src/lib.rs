//! `hemobank-emergency` — urgent blood request workflow.
//!
//! Hospital requests are approved against ledger stock or rejected;
//! individual requests get a suggested-donor contact list instead.

pub mod request;

pub use request::{
    allowed_targets, ensure_transition, ApproveRequest, DonorContactsProvided, EmergencyRequest,
    ProvideContacts, RejectRequest, RequestApproved, RequestCommand, RequestEvent, RequestId,
    RequestRejected, RequestStatus, RequestSubmitted, RequesterKind, SubmitRequest, SuggestedDonor,
};
