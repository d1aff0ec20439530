//! Extraction stages and the default collaborators behind them.
//!
//! ## Data Flow
//!
//! ```text
//! route ──▶ input ──▶ office / render ──▶ extract ──▶ llm ──▶ postprocess
//! (kind)   (URL/path)  (text / pixels)    (drivers)   (models) (cleanup)
//! ```
//!
//! 1. [`route`]: map a path to a [`route::FileKind`] by extension
//! 2. [`input`]: download image URLs to a temp dir
//! 3. [`office`]: pptx/xlsx text; [`render`]: PDF pages via pdfium. Both
//!    run in `spawn_blocking`
//! 4. [`extract`]: one driver per kind, producing an
//!    [`crate::output::ExtractionRecord`]
//! 5. [`llm`]: LLM-backed content models with retry/backoff; the only
//!    stage with network I/O besides URL downloads
//! 6. [`encode`] and [`postprocess`]: vision payloads and reply cleanup

pub mod encode;
pub mod extract;
pub mod input;
pub mod llm;
pub mod office;
pub mod postprocess;
pub mod render;
pub mod route;
