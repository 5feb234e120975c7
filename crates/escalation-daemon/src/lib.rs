//! Escalation router daemon
//!
//! Hosts an [`escalation_router::EscalationRouter`] behind a JSON-lines
//! stdin/stdout protocol, wired to OpenAI-compatible HTTP endpoints for
//! Tier 2 and Tier 3 and an optional context assembly service.

pub mod backends;
pub mod config;
pub mod protocol;
pub mod telemetry;

pub use backends::build_router;
pub use config::{DaemonConfig, DaemonConfigError};
pub use protocol::{execute, handle_line, Command, Response};
