//! Identity Verification
//!
//! Everything between "a member joined" and "the member may speak": the
//! proof protocol seam ([`proof`]), the public profile lookup ([`profile`]),
//! and the pure admission policy over both ([`policy`]).

pub mod policy;
pub mod profile;
pub mod proof;

#[cfg(test)]
mod proptests;

pub use policy::{evaluate, Eligibility, EligibilityThresholds, IneligibleReason};
pub use profile::{
    GithubProfileClient, MockProfileLookup, ProfileError, ProfileLookup, ProfileResult,
    ProfileSnapshot,
};
pub use proof::{
    decode_proof_body, extract_identity, HttpProofService, MockProofProtocol, ProofError,
    ProofIdentity, ProofProtocol, ProofRequest, ProofResult, ProofServiceConfig,
};
