//! In-band control tags.
//!
//! The model steers the loop by wrapping a follow-up instruction in a paired
//! tag such as `<SEARCH>rust 1.0 release date</SEARCH>`. Two passes read them:
//!
//! - [`TagWatcher`] runs on every streamed delta and only looks for a
//!   *closing* tag, so the loop can stop reading as soon as one appears.
//! - [`ExtractedTags::parse`] runs once per segment and pulls out the inner
//!   text of every complete pair.

use std::collections::HashMap;
use std::sync::LazyLock;

use quill_core::router::RouterAction;
use regex_lite::Regex;

/// The control tags the loop understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKind {
    /// `CANVAS_TRIGGER`, also accepted as `CANVAS-TRIGGER`
    CanvasTrigger,
    Search,
    Deep,
    Image,
    Project,
    Canvas,
    Study,
}

impl TagKind {
    pub const ALL: [TagKind; 7] = [
        Self::CanvasTrigger,
        Self::Search,
        Self::Deep,
        Self::Image,
        Self::Project,
        Self::Canvas,
        Self::Study,
    ];

    /// Every accepted tag name. A pair must open and close with the same one.
    fn names(self) -> &'static [&'static str] {
        match self {
            Self::CanvasTrigger => &["CANVAS_TRIGGER", "CANVAS-TRIGGER"],
            Self::Search => &["SEARCH"],
            Self::Deep => &["DEEP"],
            Self::Image => &["IMAGE"],
            Self::Project => &["PROJECT"],
            Self::Canvas => &["CANVAS"],
            Self::Study => &["STUDY"],
        }
    }

    /// Paired-tag regex for this kind; each spelling gets its own capture group.
    fn pair_regex(self) -> Option<&'static Regex> {
        PAIR_PATTERNS
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, re)| re)
    }

    /// Every literal spelling of the closing tag.
    pub fn closing_tags(self) -> &'static [&'static str] {
        match self {
            Self::CanvasTrigger => &["</CANVAS_TRIGGER>", "</CANVAS-TRIGGER>"],
            Self::Search => &["</SEARCH>"],
            Self::Deep => &["</DEEP>"],
            Self::Image => &["</IMAGE>"],
            Self::Project => &["</PROJECT>"],
            Self::Canvas => &["</CANVAS>"],
            Self::Study => &["</STUDY>"],
        }
    }

    /// The action this tag switches the loop to.
    pub fn action(self) -> RouterAction {
        match self {
            Self::CanvasTrigger | Self::Canvas => RouterAction::Canvas,
            Self::Search => RouterAction::Search,
            Self::Deep => RouterAction::DeepSearch,
            Self::Image => RouterAction::Image,
            Self::Project => RouterAction::Project,
            Self::Study => RouterAction::Study,
        }
    }
}

/// Compiled once per process. A pattern that fails to compile is left out,
/// which makes its tag inert rather than fatal.
static PAIR_PATTERNS: LazyLock<Vec<(TagKind, Regex)>> = LazyLock::new(|| {
    TagKind::ALL
        .into_iter()
        .filter_map(|kind| {
            let alternatives: Vec<String> = kind
                .names()
                .iter()
                .map(|name| format!("<{name}>(.*?)</{name}>"))
                .collect();
            Regex::new(&format!("(?s){}", alternatives.join("|")))
                .ok()
                .map(|re| (kind, re))
        })
        .collect()
});

/// Longest closing tag, in bytes.
const MAX_CLOSING_TAG_LEN: usize = "</CANVAS_TRIGGER>".len();

/// Incremental closing-tag detector for a growing buffer.
///
/// Each call only rescans the bytes appended since the previous call plus
/// enough of the old tail to catch a tag split across deltas.
#[derive(Debug, Default)]
pub struct TagWatcher {
    scanned: usize,
}

impl TagWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report the first closing tag that became visible since the last call.
    pub fn observe(&mut self, buffer: &str) -> Option<TagKind> {
        let mut start = self.scanned.saturating_sub(MAX_CLOSING_TAG_LEN - 1).min(buffer.len());
        while !buffer.is_char_boundary(start) {
            start -= 1;
        }
        self.scanned = buffer.len();

        let window = &buffer[start..];
        if !window.contains("</") {
            return None;
        }

        TagKind::ALL
            .iter()
            .flat_map(|kind| {
                kind.closing_tags()
                    .iter()
                    .filter_map(move |tag| window.find(tag).map(|pos| (pos, *kind)))
            })
            .min_by_key(|(pos, _)| *pos)
            .map(|(_, kind)| kind)
    }
}

/// Inner text of every `<TAG>...</TAG>` pair of one kind, in order.
///
/// Matching is non-greedy and spans lines; blank matches are dropped.
pub fn extract(segment: &str, kind: TagKind) -> Vec<String> {
    let Some(re) = kind.pair_regex() else {
        return Vec::new();
    };

    re.captures_iter(segment)
        .filter_map(|caps| (1..caps.len()).find_map(|i| caps.get(i)))
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Remove every control-tag pair from a segment, leaving the prose around it.
///
/// Text without tags is returned unchanged.
pub fn strip_control_tags(segment: &str) -> String {
    if !segment.contains('<') {
        return segment.to_string();
    }

    let mut out = segment.to_string();
    let mut changed = false;
    for (_, re) in PAIR_PATTERNS.iter() {
        let replaced = re.replace_all(&out, "");
        if replaced.len() != out.len() {
            out = replaced.into_owned();
            changed = true;
        }
    }

    if changed {
        out.trim().to_string()
    } else {
        out
    }
}

/// Where the loop goes next when no search batch produced a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub action: RouterAction,
    pub prompt: String,
}

/// All tag contents found in one segment.
#[derive(Debug, Clone, Default)]
pub struct ExtractedTags {
    tags: HashMap<TagKind, Vec<String>>,
}

impl ExtractedTags {
    pub fn parse(segment: &str) -> Self {
        let tags = TagKind::ALL
            .into_iter()
            .map(|kind| (kind, extract(segment, kind)))
            .filter(|(_, found)| !found.is_empty())
            .collect();
        Self { tags }
    }

    pub fn get(&self, kind: TagKind) -> &[String] {
        self.tags.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn search_queries(&self) -> &[String] {
        self.get(TagKind::Search)
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Priority order after the search batch:
    /// `DEEP`, a lone `SEARCH` (only when no batch ran), then
    /// `IMAGE`, `PROJECT`, `CANVAS_TRIGGER`/`CANVAS`, `STUDY`.
    pub fn fallback_directive(&self, batch_ran: bool) -> Option<Directive> {
        let first = |kind: TagKind| {
            self.get(kind).first().map(|prompt| Directive {
                action: kind.action(),
                prompt: prompt.clone(),
            })
        };

        if let Some(d) = first(TagKind::Deep) {
            return Some(d);
        }

        if !batch_ran && self.search_queries().len() == 1 {
            return first(TagKind::Search);
        }

        [
            TagKind::Image,
            TagKind::Project,
            TagKind::CanvasTrigger,
            TagKind::Canvas,
            TagKind::Study,
        ]
        .into_iter()
        .find_map(first)
    }
}
