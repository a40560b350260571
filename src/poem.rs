//! Poem value types shared by every stage of the pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Offset the legacy client used to keep translated ids apart from source ids.
pub const LEGACY_TRANSLATION_OFFSET: u64 = 1000;

/// Title used when the upstream omits one ("untitled").
pub const UNTITLED: &str = "بدون عنوان";

/// Poet name used when the upstream omits one ("unknown poet").
pub const UNKNOWN_POET: &str = "شاعر ناشناس";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "fa")]
    Persian,
    #[serde(rename = "en")]
    English,
}

impl Language {
    pub fn code(self) -> &'static str {
        match self {
            Language::Persian => "fa",
            Language::English => "en",
        }
    }

    /// Human-readable name used inside LLM prompts.
    pub fn prompt_name(self) -> &'static str {
        match self {
            Language::Persian => "Persian (Farsi)",
            Language::English => "English",
        }
    }

    /// Best-effort script/language detection. Returns None when unreliable
    /// or when the text is in neither supported language.
    pub fn detect(text: &str) -> Option<Language> {
        let info = whatlang::detect(text)?;
        match info.lang() {
            whatlang::Lang::Pes | whatlang::Lang::Ara | whatlang::Lang::Urd => {
                Some(Language::Persian)
            }
            whatlang::Lang::Eng if info.is_reliable() => Some(Language::English),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fa" | "persian" | "farsi" => Ok(Language::Persian),
            "en" | "english" => Ok(Language::English),
            other => Err(format!("unsupported language: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poet {
    pub id: Option<u64>,
    pub name: String,
    pub full_name: String,
}

/// Composite identity: upstream id plus the language the text is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoemKey {
    pub id: u64,
    pub language: Language,
}

impl fmt::Display for PoemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.language, self.id)
    }
}

/// A poem as shown in the feed. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poem {
    pub id: u64,
    pub language: Language,
    pub title: String,
    pub text: String,
    pub html_text: String,
    pub poet: Poet,
}

impl Poem {
    pub fn key(&self) -> PoemKey {
        PoemKey {
            id: self.id,
            language: self.language,
        }
    }

    /// Id under the old arithmetic-offset scheme, for consumers still keyed on it.
    pub fn legacy_offset_id(&self, source_language: Language) -> u64 {
        if self.language == source_language {
            self.id
        } else {
            self.id.saturating_add(LEGACY_TRANSLATION_OFFSET)
        }
    }

    /// Non-empty, trimmed lines.
    pub fn lines(&self) -> Vec<&str> {
        non_empty_lines(&self.text)
    }

    /// Lines grouped into beyts (couplets). A trailing odd line stands alone.
    pub fn couplets(&self) -> Vec<Vec<&str>> {
        self.lines().chunks(2).map(|c| c.to_vec()).collect()
    }

    pub fn couplet_count(&self) -> usize {
        self.lines().len().div_ceil(2)
    }
}

pub fn non_empty_lines(text: &str) -> Vec<&str> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect()
}

/// Renders plain newline-delimited text as line-broken html.
pub fn html_from_text(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', "<br>")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(text: &str) -> Poem {
        Poem {
            id: 1,
            language: Language::Persian,
            title: "t".into(),
            text: text.into(),
            html_text: html_from_text(text),
            poet: Poet {
                id: None,
                name: "p".into(),
                full_name: "p".into(),
            },
        }
    }

    #[test]
    fn couplets_pair_lines_and_skip_blanks() {
        let poem = sample("a\nb\n\n c \nd\ne");
        assert_eq!(poem.lines(), vec!["a", "b", "c", "d", "e"]);
        assert_eq!(poem.couplets(), vec![vec!["a", "b"], vec!["c", "d"], vec!["e"]]);
        assert_eq!(poem.couplet_count(), 3);
    }

    #[test]
    fn html_uses_line_breaks() {
        assert_eq!(html_from_text("a\r\nb\nc"), "a<br>b<br>c");
    }

    #[test]
    fn legacy_offset_only_applies_to_translations() {
        let mut poem = sample("a");
        assert_eq!(poem.legacy_offset_id(Language::Persian), 1);
        poem.language = Language::English;
        assert_eq!(poem.legacy_offset_id(Language::Persian), 1001);
        poem.id = u64::MAX - 1;
        assert_eq!(poem.legacy_offset_id(Language::Persian), u64::MAX);
    }

    #[test]
    fn language_round_trips_through_codes() {
        assert_eq!("FA".parse::<Language>().unwrap(), Language::Persian);
        assert_eq!(Language::English.to_string(), "en");
        assert!("de".parse::<Language>().is_err());
    }

    #[test]
    fn detects_persian_script() {
        let text = "الا یا ایها الساقی ادر کاسا و ناولها که عشق آسان نمود اول ولی افتاد مشکل‌ها";
        assert_eq!(Language::detect(text), Some(Language::Persian));
    }
}
