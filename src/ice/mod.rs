// src/ice/mod.rs
//! ICE pieces needed on the signalling side: candidate attribute parsing and
//! the server list a browser is configured with

pub mod candidate;
pub mod configuration;

pub use candidate::{
    Candidate, CandidateType, ConnectionAddress, TcpType, TransportProtocol, CANDIDATE_PREFIX,
};
pub use configuration::{IceConfiguration, IceServer};
