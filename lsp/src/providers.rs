//! Code-intelligence providers and the default text-based implementation.
//!
//! A provider is a pure function of `(document snapshot, position, settings)`.
//! The session always runs them on a worker through the request ledger.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use url::Url;

use ember_types::Settings;

use crate::documents::DocumentSnapshot;
use crate::protocol::{ErrorCode, Position, Range, RequestError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("position {}:{} is outside the document", .0.line, .0.character)]
    InvalidPosition(Position),
    #[error("provider failed: {0}")]
    Failed(String),
}

impl From<ProviderError> for RequestError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::InvalidPosition(_) => RequestError::invalid_params(err.to_string()),
            ProviderError::Failed(_) => RequestError::new(ErrorCode::RequestFailed, err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarkupContent {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hover {
    pub contents: MarkupContent,
    pub range: Range,
}

pub const COMPLETION_KIND_FUNCTION: u8 = 3;
pub const COMPLETION_KIND_VARIABLE: u8 = 6;
pub const COMPLETION_KIND_MODULE: u8 = 9;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionItem {
    pub label: String,
    pub kind: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    pub uri: Url,
    pub range: Range,
}

pub const SYMBOL_KIND_MODULE: u8 = 2;
pub const SYMBOL_KIND_FUNCTION: u8 = 12;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSymbol {
    pub name: String,
    pub kind: u8,
    pub range: Range,
    pub selection_range: Range,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextEdit {
    pub range: Range,
    pub new_text: String,
}

pub trait Providers: Send + Sync {
    fn hover(
        &self,
        doc: &DocumentSnapshot,
        position: Position,
        settings: &Settings,
    ) -> Result<Option<Hover>, ProviderError>;

    fn completion(
        &self,
        doc: &DocumentSnapshot,
        position: Position,
        settings: &Settings,
    ) -> Result<Vec<CompletionItem>, ProviderError>;

    fn definition(
        &self,
        doc: &DocumentSnapshot,
        position: Position,
        settings: &Settings,
    ) -> Result<Option<Location>, ProviderError>;

    fn document_symbols(
        &self,
        doc: &DocumentSnapshot,
        settings: &Settings,
    ) -> Result<Vec<DocumentSymbol>, ProviderError>;

    fn format(&self, doc: &DocumentSnapshot, settings: &Settings)
    -> Result<Vec<TextEdit>, ProviderError>;
}

fn definition_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?m)^[ \t]*(defmodule|defprotocol|defmacrop?|defguardp?|defp?)[ \t]+([A-Za-z_][\w.]*[?!]?)",
        )
        .expect("definition regex is valid")
    })
}

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*[?!]?").expect("identifier regex is valid"))
}

fn is_ident_char(ch: char) -> bool {
    ch.is_alphanumeric() || matches!(ch, '_' | '?' | '!')
}

/// Byte offset of an LSP position. `character` counts UTF-16 units and is
/// clamped to the end of its line; a line past the end is an error.
fn offset_at(text: &str, position: Position) -> Result<usize, ProviderError> {
    let mut line_start = 0;
    for _ in 0..position.line {
        match text[line_start..].find('\n') {
            Some(nl) => line_start += nl + 1,
            None => return Err(ProviderError::InvalidPosition(position)),
        }
    }
    let line_end = text[line_start..]
        .find('\n')
        .map_or(text.len(), |nl| line_start + nl);

    let mut units = 0u32;
    for (idx, ch) in text[line_start..line_end].char_indices() {
        if units >= position.character {
            return Ok(line_start + idx);
        }
        units += ch.len_utf16() as u32;
    }
    Ok(line_end)
}

fn position_at(text: &str, offset: usize) -> Position {
    let before = &text[..offset];
    let line = before.matches('\n').count() as u32;
    let line_start = before.rfind('\n').map_or(0, |nl| nl + 1);
    let character = before[line_start..].chars().map(char::len_utf16).sum::<usize>() as u32;
    Position::new(line, character)
}

fn range_of(text: &str, start: usize, end: usize) -> Range {
    Range::new(position_at(text, start), position_at(text, end))
}

/// Word boundaries around `offset`, if the cursor touches a word.
fn word_at(text: &str, offset: usize) -> Option<(usize, usize)> {
    let start = text[..offset]
        .char_indices()
        .rev()
        .take_while(|(_, ch)| is_ident_char(*ch))
        .last()
        .map_or(offset, |(idx, _)| idx);
    let end = text[offset..]
        .char_indices()
        .find(|(_, ch)| !is_ident_char(*ch))
        .map_or(text.len(), |(idx, _)| offset + idx);
    (start < end).then_some((start, end))
}

/// Text-only providers that need no compiler: word hover, identifier
/// completion, `def`-based definitions and symbols, whitespace formatting.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextProviders;

impl TextProviders {
    fn definitions(text: &str) -> impl Iterator<Item = (&str, usize, usize, usize)> {
        definition_regex().captures_iter(text).filter_map(|caps| {
            let keyword = caps.get(1)?;
            let name = caps.get(2)?;
            Some((keyword.as_str(), keyword.start(), name.start(), name.end()))
        })
    }
}

impl Providers for TextProviders {
    fn hover(
        &self,
        doc: &DocumentSnapshot,
        position: Position,
        _settings: &Settings,
    ) -> Result<Option<Hover>, ProviderError> {
        let text = &*doc.text;
        let offset = offset_at(text, position)?;
        let Some((start, end)) = word_at(text, offset) else {
            return Ok(None);
        };
        let word = &text[start..end];
        let occurrences = identifier_regex()
            .find_iter(text)
            .filter(|m| m.as_str() == word)
            .count();
        Ok(Some(Hover {
            contents: MarkupContent {
                kind: "markdown",
                value: format!("```elixir\n{word}\n```\n\n{occurrences} occurrence(s) in this file"),
            },
            range: range_of(text, start, end),
        }))
    }

    fn completion(
        &self,
        doc: &DocumentSnapshot,
        position: Position,
        _settings: &Settings,
    ) -> Result<Vec<CompletionItem>, ProviderError> {
        let text = &*doc.text;
        let offset = offset_at(text, position)?;
        let prefix_start = text[..offset]
            .char_indices()
            .rev()
            .take_while(|(_, ch)| is_ident_char(*ch))
            .last()
            .map_or(offset, |(idx, _)| idx);
        let prefix = &text[prefix_start..offset];

        let defined: BTreeSet<&str> = Self::definitions(text)
            .map(|(_, _, start, end)| &text[start..end])
            .collect();

        let mut seen = BTreeSet::new();
        for found in identifier_regex().find_iter(text) {
            // The word being typed is not its own completion.
            if found.start() == prefix_start {
                continue;
            }
            let word = found.as_str();
            if word.starts_with(prefix) && word != prefix {
                seen.insert(word);
            }
        }

        Ok(seen
            .into_iter()
            .map(|label| CompletionItem {
                label: label.to_string(),
                kind: if defined.contains(label) {
                    COMPLETION_KIND_FUNCTION
                } else if label.starts_with(char::is_uppercase) {
                    COMPLETION_KIND_MODULE
                } else {
                    COMPLETION_KIND_VARIABLE
                },
            })
            .collect())
    }

    fn definition(
        &self,
        doc: &DocumentSnapshot,
        position: Position,
        _settings: &Settings,
    ) -> Result<Option<Location>, ProviderError> {
        let text = &*doc.text;
        let offset = offset_at(text, position)?;
        let Some((start, end)) = word_at(text, offset) else {
            return Ok(None);
        };
        let word = &text[start..end];
        let found = Self::definitions(text).find(|(_, _, name_start, name_end)| {
            let name = &text[*name_start..*name_end];
            name == word || name.rsplit('.').next() == Some(word)
        });
        Ok(found.map(|(_, _, name_start, name_end)| Location {
            uri: doc.uri.clone(),
            range: range_of(text, name_start, name_end),
        }))
    }

    fn document_symbols(
        &self,
        doc: &DocumentSnapshot,
        _settings: &Settings,
    ) -> Result<Vec<DocumentSymbol>, ProviderError> {
        let text = &*doc.text;
        Ok(Self::definitions(text)
            .map(|(keyword, keyword_start, name_start, name_end)| {
                let line_end = text[name_end..]
                    .find('\n')
                    .map_or(text.len(), |nl| name_end + nl);
                DocumentSymbol {
                    name: text[name_start..name_end].to_string(),
                    kind: if keyword == "defmodule" || keyword == "defprotocol" {
                        SYMBOL_KIND_MODULE
                    } else {
                        SYMBOL_KIND_FUNCTION
                    },
                    range: range_of(text, keyword_start, line_end),
                    selection_range: range_of(text, name_start, name_end),
                }
            })
            .collect())
    }

    fn format(
        &self,
        doc: &DocumentSnapshot,
        _settings: &Settings,
    ) -> Result<Vec<TextEdit>, ProviderError> {
        let text = &*doc.text;
        let mut formatted: String = text
            .lines()
            .map(str::trim_end)
            .collect::<Vec<_>>()
            .join("\n");
        let trimmed_len = formatted.trim_end_matches('\n').len();
        formatted.truncate(trimmed_len);
        if !formatted.is_empty() {
            formatted.push('\n');
        }

        if formatted == text {
            return Ok(Vec::new());
        }
        Ok(vec![TextEdit {
            range: range_of(text, 0, text.len()),
            new_text: formatted,
        }])
    }
}
