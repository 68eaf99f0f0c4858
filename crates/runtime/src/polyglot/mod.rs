//! Polyglot execution layer
//!
//! Host values are marshalled into guest-language preludes, the
//! assembled program runs in an isolated subprocess with a deadline, and
//! results come back either through the sentinel-framed JSON protocol or
//! per-language textual rules. Independent blocks at the same statement
//! level fan out across OS threads.

pub mod dispatch;
pub mod exec;
pub mod langs;
pub mod marshal;
pub mod schedule;

pub use dispatch::{Dispatcher, PolyglotConfig};
pub use exec::GuestOutput;
pub use langs::{Language, PreparedProgram};
pub use schedule::{FanOutJob, run_fanout};

/// Sentinel lines framing a JSON payload printed by guest code.
pub const RETURN_SENTINEL: &str = "---NAAB-RETURN---";
pub const END_RETURN_SENTINEL: &str = "---END-NAAB-RETURN---";
