//! A chunked large-text engine for editors.
//!
//! The buffer ([`ChunkStore`]) holds chars in Arc-shared chunks with
//! Fenwick-indexed offsets and line breaks, so edits and queries stay
//! logarithmic in chunk count no matter how large the document grows.
//! On top of it sit:
//!
//! - incremental wrap layout ([`LayoutEngine`]) mapping text to visual
//!   rows for a content width, updated per edit and always identical to a
//!   from-scratch pass;
//! - a non-destructive transform overlay ([`TransformLayer`]) that
//!   replaces, hides or augments ranges without touching the stored text;
//! - pluggable [`IncrementalTransformation`]s that keep content-derived
//!   decorations (like [`VariableHighlighter`]'s `${{name}}` blocks)
//!   current from change events alone.
//!
//! All public offsets are char-based. Mutation is single-writer; readers
//! on other threads hold [`ChunkSnapshot`]s.

pub mod chunk_store;
pub mod error;
pub mod event;
mod fenwick;
pub mod incremental;
pub mod layout;
mod line_index;
pub mod text;
pub mod transform;

pub use chunk_store::{ChunkConfig, ChunkSnapshot, ChunkStore};
pub use error::{Result, TextError};
pub use event::{ChangeEvent, ChangeKind, ChangeListener};
pub use incremental::{
    find_pattern, IncrementalTransformation, SearchDirection, VariableHighlighter,
};
pub use layout::{
    CharMeasurer, FixedWidthMeasurer, LayoutEngine, LayoutRow, LayoutText, UnicodeWidthMeasurer,
};
pub use text::{MutableText, TextSource};
pub use transform::{OffsetMapping, SpanEditor, TransformLayer, TransformSpan};
