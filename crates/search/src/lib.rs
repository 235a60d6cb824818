//! Search fallback engine.
//!
//! Resolves a live-information query through an ordered chain of
//! providers with per-attempt timeouts and a read-through cache:
//!
//! 1. cache lookup by normalized query (live entry → immediate return)
//! 2. primary structured-API provider (DuckDuckGo Instant Answers)
//! 3. secondary HTML-scrape provider
//! 4. stale cache entry, marked `stale = true`, as a last resort
//!
//! Network errors are transient by definition here and never propagate
//! past this crate — callers only ever see a `SearchOutcome`.

mod engine;
mod providers;

pub use engine::SearchEngine;
pub use providers::{InstantAnswerProvider, ScrapeProvider};
