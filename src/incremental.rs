//! Content-driven transformations that track edits incrementally.
//!
//! An [`IncrementalTransformation`] owns a piece of derived decoration
//! state over a [`TransformLayer`](crate::transform::TransformLayer): it
//! scans the full text once at attach time, then patches its spans from
//! individual change events using bounded-window searches around the edit,
//! never rescanning the whole buffer.
//!
//! [`VariableHighlighter`] is the built-in example: it decorates
//! `${{name}}` references as `<name>` blocks.

use regex::Regex;
use std::collections::BTreeMap;
use std::ops::Range;
use tracing::{debug, warn};

use crate::error::TextError;
use crate::event::{ChangeEvent, ChangeKind};
use crate::text::TextSource;
use crate::transform::{OffsetMapping, SpanEditor};

/// A plugin reacting to buffer changes by editing transform spans.
///
/// `text` is always the original (untransformed) buffer, already in its
/// post-edit state; span ranges handed to `editor` are original
/// coordinates.
pub trait IncrementalTransformation {
    /// One-time full scan when the plugin is attached.
    fn initialize(&mut self, text: &dyn TextSource, editor: &mut dyn SpanEditor);

    /// Called once per buffer mutation, after span ranges have been
    /// shifted for the edit.
    fn on_text_change(
        &mut self,
        event: &ChangeEvent,
        text: &dyn TextSource,
        editor: &mut dyn SpanEditor,
    );
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchDirection {
    Forward,
    Backward,
}

/// Bounded substring search in char coordinates.
///
/// Scans the window `[from - pattern_len, to + pattern_len)` clamped to the
/// text, so a pattern merely touching the `from..to` range is still found.
/// Returns the char offset of the first (or last, going backward) match.
pub fn find_pattern(
    text: &dyn TextSource,
    from: usize,
    to: usize,
    pattern: &str,
    direction: SearchDirection,
) -> Option<usize> {
    if pattern.is_empty() {
        return None;
    }
    let pat_len = pattern.chars().count();
    let begin = from.saturating_sub(pat_len);
    let end = to.saturating_add(pat_len).min(text.len());
    if begin >= end {
        return None;
    }
    let window = text.substring(begin..end).ok()?;
    let byte_idx = match direction {
        SearchDirection::Forward => window.find(pattern)?,
        SearchDirection::Backward => window.rfind(pattern)?,
    };
    Some(begin + window[..byte_idx].chars().count())
}

const OPEN: &str = "${{";
const CLOSE: &str = "}}";
const DEFAULT_PROCESS_LENGTH_LIMIT: usize = 30;

fn decorate(name: &str) -> String {
    format!("<{name}>")
}

/// Decorates `${{name}}` variable references as whole-block `<name>` spans.
///
/// Initialization runs one regex pass over the full text; afterwards every
/// edit is handled with searches bounded by `process_length_limit` chars
/// around the change, so the cost of typing does not grow with buffer
/// size. Matched ranges are cached and re-anchored on every event.
pub struct VariableHighlighter {
    process_length_limit: usize,
    pattern: Regex,
    // match start -> end (exclusive), original coordinates
    active: BTreeMap<usize, usize>,
}

impl Default for VariableHighlighter {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableHighlighter {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_PROCESS_LENGTH_LIMIT)
    }

    /// `process_length_limit` caps both the variable name length and the
    /// search radius around an edit.
    pub fn with_limit(process_length_limit: usize) -> Self {
        let process_length_limit = process_length_limit.max(1);
        let pattern = Regex::new(&format!(
            r"\$\{{\{{([^{{}}]{{1,{process_length_limit}}})\}}\}}"
        ))
        .expect("variable reference pattern is valid");
        VariableHighlighter {
            process_length_limit,
            pattern,
            active: BTreeMap::new(),
        }
    }

    fn register(
        &mut self,
        start: usize,
        end: usize,
        text: &dyn TextSource,
        editor: &mut dyn SpanEditor,
    ) {
        if self.active.get(&start) == Some(&end) {
            return;
        }
        let name = match text.substring(start + OPEN.len()..end - CLOSE.len()) {
            Ok(name) => name,
            Err(_) => return,
        };
        if name.is_empty()
            || name.chars().count() > self.process_length_limit
            || name.contains('{')
            || name.contains('}')
        {
            return;
        }
        let replacement = decorate(&name);
        match editor.replace(start..end, &replacement, OffsetMapping::WholeBlock) {
            Ok(()) => {
                self.active.insert(start, end);
            }
            Err(TextError::OverlapConflict { .. }) => {
                // A stale span from an earlier match covers part of the
                // range; swap it out.
                debug!(start, end, "re-decorating variable over stale span");
                if editor.restore_to_original(start..end).is_ok()
                    && editor
                        .replace(start..end, &replacement, OffsetMapping::WholeBlock)
                        .is_ok()
                {
                    self.active.insert(start, end);
                }
            }
            Err(err) => warn!(%err, start, end, "variable span registration failed"),
        }
    }

    fn unregister(&mut self, start: usize, end: usize, editor: &mut dyn SpanEditor) {
        let end = end.min(editor.original_len());
        if start >= end {
            return;
        }
        if editor.restore_to_original(start..end).is_err() {
            return;
        }
        let stale: Vec<usize> = self
            .active
            .range(..end)
            .filter(|&(_, &e)| e > start)
            .map(|(&s, _)| s)
            .collect();
        for key in stale {
            self.active.remove(&key);
        }
    }

    fn shift_cache_insert(&mut self, p: usize, n: usize) {
        let old = std::mem::take(&mut self.active);
        for (s, e) in old {
            if s >= p {
                self.active.insert(s + n, e + n);
            } else if e <= p {
                self.active.insert(s, e);
            }
            // an insert landing inside a match invalidates its cache entry
        }
    }

    fn shift_cache_delete(&mut self, r: &Range<usize>) {
        let n = r.len();
        let old = std::mem::take(&mut self.active);
        for (s, e) in old {
            if e <= r.start {
                self.active.insert(s, e);
            } else if s >= r.end {
                self.active.insert(s - n, e - n);
            }
            // matches touching the deleted range drop; the delete handler
            // restores their spans
        }
    }

    fn handle_insert(
        &mut self,
        event: &ChangeEvent,
        text: &dyn TextSource,
        editor: &mut dyn SpanEditor,
    ) {
        let limit = self.process_length_limit;
        // Case 1: the insert supplied (part of) the closing delimiter.
        if let Some(close) = find_pattern(
            text,
            event.start,
            event.end,
            CLOSE,
            SearchDirection::Forward,
        ) {
            if let Some(open) = find_pattern(
                text,
                close.saturating_sub(limit),
                close.saturating_sub(1),
                OPEN,
                SearchDirection::Backward,
            ) {
                self.register(open, close + CLOSE.len(), text, editor);
            }
        }
        // Case 2: the insert supplied (part of) the opening delimiter.
        if let Some(open) = find_pattern(text, event.start, event.end, OPEN, SearchDirection::Forward)
        {
            if let Some(close) = find_pattern(
                text,
                open + OPEN.len(),
                open + limit,
                CLOSE,
                SearchDirection::Forward,
            ) {
                self.register(open, close + CLOSE.len(), text, editor);
            }
        }
    }

    fn handle_delete(
        &mut self,
        event: &ChangeEvent,
        text: &dyn TextSource,
        editor: &mut dyn SpanEditor,
    ) {
        let limit = self.process_length_limit;
        // A match whose closing delimiter survived the cut.
        if let Some(close) = find_pattern(
            text,
            event.start.saturating_sub(limit),
            event.end,
            CLOSE,
            SearchDirection::Backward,
        ) {
            if close < event.end && close + CLOSE.len() > event.start {
                if let Some(open) = find_pattern(
                    text,
                    close.saturating_sub(limit),
                    close.saturating_sub(1),
                    OPEN,
                    SearchDirection::Backward,
                ) {
                    self.unregister(open, close + CLOSE.len(), editor);
                }
            }
        }
        // A match whose opening delimiter survived the cut.
        if let Some(open) = find_pattern(
            text,
            event.start.saturating_sub(limit),
            event.end,
            OPEN,
            SearchDirection::Forward,
        ) {
            if open < event.end && open + OPEN.len() > event.start {
                if let Some(close) = find_pattern(
                    text,
                    open + OPEN.len(),
                    open + limit,
                    CLOSE,
                    SearchDirection::Forward,
                ) {
                    self.unregister(open, close + CLOSE.len(), editor);
                }
            }
        }
    }
}

impl IncrementalTransformation for VariableHighlighter {
    fn initialize(&mut self, text: &dyn TextSource, editor: &mut dyn SpanEditor) {
        self.active.clear();
        let content = text.build_string();
        // The regex reports byte offsets; track the char offset alongside.
        let mut char_idx = 0usize;
        let mut byte_idx = 0usize;
        for m in self.pattern.find_iter(&content) {
            char_idx += content[byte_idx..m.start()].chars().count();
            let start = char_idx;
            let match_chars = content[m.start()..m.end()].chars().count();
            byte_idx = m.end();
            char_idx += match_chars;
            let name = &content[m.start() + OPEN.len()..m.end() - CLOSE.len()];
            if let Err(err) = editor.replace(
                start..start + match_chars,
                &decorate(name),
                OffsetMapping::WholeBlock,
            ) {
                warn!(%err, start, "initial variable span registration failed");
                continue;
            }
            self.active.insert(start, start + match_chars);
        }
    }

    fn on_text_change(
        &mut self,
        event: &ChangeEvent,
        text: &dyn TextSource,
        editor: &mut dyn SpanEditor,
    ) {
        match event.kind {
            ChangeKind::Insert => {
                self.shift_cache_insert(event.start, event.len());
                self.handle_insert(event, text, editor);
            }
            ChangeKind::Delete => {
                self.shift_cache_delete(&event.range());
                self.handle_delete(event, text, editor);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_store::{ChunkConfig, ChunkStore};
    use crate::text::MutableText;
    use crate::transform::TransformLayer;

    fn highlighted(text: &str) -> TransformLayer<ChunkStore> {
        let mut layer = TransformLayer::new(ChunkStore::from_text(text, ChunkConfig::new(16)));
        layer.attach(Box::new(VariableHighlighter::new()));
        layer
    }

    #[test]
    fn find_pattern_forward_and_backward() {
        let text = ChunkStore::from_text("xx}}yy}}zz", ChunkConfig::new(4));
        assert_eq!(
            find_pattern(&text, 0, 10, "}}", SearchDirection::Forward),
            Some(2)
        );
        assert_eq!(
            find_pattern(&text, 0, 10, "}}", SearchDirection::Backward),
            Some(6)
        );
        // window touching a match still finds it
        assert_eq!(
            find_pattern(&text, 3, 3, "}}", SearchDirection::Forward),
            Some(2)
        );
        assert_eq!(
            find_pattern(&text, 0, 1, "missing", SearchDirection::Forward),
            None
        );
    }

    #[test]
    fn initialize_decorates_existing_references() {
        let layer = highlighted("GET ${{host}}/api?key=${{apiKey}} done");
        assert_eq!(layer.build_string(), "GET <host>/api?key=<apiKey> done");
        assert_eq!(
            layer.inner().build_string(),
            "GET ${{host}}/api?key=${{apiKey}} done"
        );
    }

    #[test]
    fn initialize_handles_multibyte_prefixes() {
        let layer = highlighted("日本 ${{x}} и ${{y}}");
        assert_eq!(layer.build_string(), "日本 <x> и <y>");
    }

    #[test]
    fn braces_and_empty_names_are_not_references() {
        let layer = highlighted("${{}} ${{a{b}} ${{ok}}");
        assert_eq!(layer.build_string(), "${{}} ${{a{b}} <ok>");
    }

    #[test]
    fn overlong_names_are_not_references() {
        let long = "v".repeat(31);
        let layer = highlighted(&format!("${{{{{long}}}}}"));
        assert_eq!(layer.build_string(), format!("${{{{{long}}}}}"));
        let ok = "v".repeat(30);
        let layer = highlighted(&format!("${{{{{ok}}}}}"));
        assert_eq!(layer.build_string(), format!("<{ok}>"));
    }

    #[test]
    fn pasting_a_whole_reference_decorates_it() {
        let mut layer = highlighted("ab");
        layer.insert(2, "${{v}}").unwrap();
        assert_eq!(layer.build_string(), "ab<v>");
        assert_eq!(layer.inner().build_string(), "ab${{v}}");
    }

    #[test]
    fn typing_a_reference_in_two_halves_decorates_on_completion() {
        let mut layer = highlighted("");
        layer.insert(0, "${{na").unwrap();
        assert_eq!(layer.build_string(), "${{na");
        layer.insert(5, "me}}").unwrap();
        assert_eq!(layer.build_string(), "<name>");
    }

    #[test]
    fn completing_the_opening_delimiter_decorates() {
        let mut layer = highlighted("{{port}} end");
        assert_eq!(layer.build_string(), "{{port}} end");
        layer.insert(0, "$").unwrap();
        assert_eq!(layer.build_string(), "<port> end");
    }

    #[test]
    fn deleting_a_delimiter_restores_raw_text() {
        let mut layer = highlighted("${{name}} tail");
        assert_eq!(layer.build_string(), "<name> tail");
        layer.delete(0..1).unwrap();
        assert_eq!(layer.build_string(), "{{name}} tail");
        assert!(layer.spans().is_empty());
    }

    #[test]
    fn deleting_the_closing_brace_restores_raw_text() {
        let mut layer = highlighted("x ${{v}} y");
        assert_eq!(layer.build_string(), "x <v> y");
        layer.delete(7..8).unwrap();
        assert_eq!(layer.build_string(), "x ${{v} y");
    }

    #[test]
    fn unrelated_edits_keep_decorations() {
        let mut layer = highlighted("head ${{v}} tail");
        layer.insert(0, ">> ").unwrap();
        assert_eq!(layer.build_string(), ">> head <v> tail");
        let len = layer.original_len();
        layer.delete(len - 5..len).unwrap();
        assert_eq!(layer.build_string(), ">> head <v>");
    }

    #[test]
    fn retyping_over_a_reference_region_redecorates() {
        let mut layer = highlighted("a ${{one}} b");
        assert_eq!(layer.build_string(), "a <one> b");
        // delete the whole reference, then type a fresh one in its place
        layer.delete(2..10).unwrap();
        assert_eq!(layer.build_string(), "a  b");
        layer.insert(2, "${{two}}").unwrap();
        assert_eq!(layer.build_string(), "a <two> b");
    }
}
