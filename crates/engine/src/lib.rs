//! Turn orchestration.
//!
//! [`TurnEngine`] consumes inbound gateway events and produces outbound
//! reply text, wiring the other crates together in dependency order:
//! rules short-circuit first, then context assembly, inference, response
//! post-processing, and exchange recording. Turns for the same channel
//! are serialized; channels run in parallel.

mod engine;

pub use engine::{TurnEngine, TurnOutcome};
