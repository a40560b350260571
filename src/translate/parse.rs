//! Prompt construction and labeled-section parsing for poem translation.
//!
//! The model is asked for three sections headed `POEM:`, `TITLE:` and
//! `POET:`. Models drift (markdown bold, reordered or missing sections), so
//! parsing locates every recognized header and slices the text between them.

use std::sync::OnceLock;

use regex::Regex;

use crate::poem::{Language, Poem};

pub const SYSTEM_PROMPT: &str = "You are a literary translator of classical Persian poetry. \
Keep one output line per input line and preserve imagery over literal wording. \
Answer only in the requested labeled format.";

pub fn build_user_prompt(poem: &Poem, target: Language) -> String {
    let lang = target.prompt_name();
    format!(
        "Translate the poem below into {lang}.\n\
         Respond with exactly three labeled sections and nothing else:\n\
         POEM:\n<the translated poem, one line per original line>\n\
         TITLE:\n<the translated title>\n\
         POET:\n<the poet's name as commonly written in {lang}>\n\n\
         Title: {title}\nPoet: {poet}\nPoem:\n{text}",
        title = poem.title,
        poet = poem.poet.name,
        text = poem.text,
    )
}

/// Sections recovered from a completion. Absent labels are `None`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TranslatedSections {
    pub poem: Option<String>,
    pub title: Option<String>,
    pub poet: Option<String>,
}

fn header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?mi)^[ \t]*[*#_]*[ \t]*(POEM|TITLE|POET)[ \t]*[*_]*[ \t]*:[ \t]*[*_]*")
            .expect("header regex is valid")
    })
}

pub fn parse_sections(response: &str) -> TranslatedSections {
    let headers: Vec<(String, usize, usize)> = header_regex()
        .captures_iter(response)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let label = caps.get(1)?.as_str().to_ascii_uppercase();
            Some((label, whole.start(), whole.end()))
        })
        .collect();

    let mut sections = TranslatedSections::default();
    for (i, (label, _, content_start)) in headers.iter().enumerate() {
        let content_end = headers
            .get(i + 1)
            .map(|(_, start, _)| *start)
            .unwrap_or(response.len());
        let content = clean_section(&response[*content_start..content_end]);
        if content.is_empty() {
            continue;
        }
        let slot = match label.as_str() {
            "POEM" => &mut sections.poem,
            "TITLE" => &mut sections.title,
            _ => &mut sections.poet,
        };
        // First occurrence wins.
        if slot.is_none() {
            *slot = Some(content);
        }
    }
    sections
}

/// Trims each line, drops blank lines and stray markdown fences.
fn clean_section(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}
