//! Outbound side: partner balance APIs and what their payloads mean.

pub mod discovery;
pub mod normalizer;
pub mod partner_api;

pub use discovery::{Discovery, ProbeReport, ProbeRequest};
pub use normalizer::{Amount, MatchStrategy, normalize, parse_payload};
pub use partner_api::PartnerClient;
