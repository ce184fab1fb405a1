//! stun-trace library (lib.rs)
//!
//! STUN Binding responder that remembers every request for a short while, so
//! the server-reflexive candidates a browser later posts in its SDP can be
//! traced back to the exact packet that produced them.

#![warn(clippy::all)]

pub mod audit;
pub mod config;
pub mod correlator;
pub mod error;
pub mod ice;
pub mod sdp;
pub mod storage;
pub mod stun;

pub use audit::{AuditRecord, AuditSink, ClientMetadata, CsvAuditLog, MemoryAuditLog};
pub use config::ServerConfig;
pub use correlator::{CandidateOutcome, CorrelationReport, Correlator, MatchedRequest, ReportEntry};
pub use error::{CandidateParseError, NatError, NatResult, SdpError, StunError};
pub use ice::{Candidate, CandidateType, IceConfiguration};
pub use sdp::{decode_session, Line, Session};
pub use storage::{CorrelationKey, CorrelationStore};
pub use stun::{BindingServer, Message};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging
///
/// `RUST_LOG` takes precedence over `level` (trace/debug/info/warn/error).
///
/// # Example
/// ```
/// stun_trace::init_logging("info");
/// ```
pub fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let mut filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // Reduce verbosity of some dependencies
    for directive in ["tokio=warn", "runtime=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .with(filter)
        .try_init();
}
