//! Persian ↔ English poet names, used when the model omits the `POET:` section.
//! A built-in table of classical poets, optionally extended from a JSON file.

use std::path::Path;

use serde::Deserialize;

use crate::poem::Language;

const BUILTIN: &[(&str, &str)] = &[
    ("حافظ", "Hafez"),
    ("مولانا", "Rumi"),
    ("مولوی", "Rumi"),
    ("سعدی", "Saadi"),
    ("خیام", "Khayyam"),
    ("فردوسی", "Ferdowsi"),
    ("عطار", "Attar"),
    ("نظامی", "Nezami"),
    ("باباطاهر", "Baba Taher"),
    ("جامی", "Jami"),
    ("سنایی", "Sanai"),
    ("رودکی", "Rudaki"),
    ("پروین اعتصامی", "Parvin E'tesami"),
    ("صائب", "Saib Tabrizi"),
    ("شهریار", "Shahriar"),
    ("ناصرخسرو", "Naser Khosrow"),
    ("انوری", "Anvari"),
    ("خاقانی", "Khaqani"),
    ("منوچهری", "Manuchehri"),
    ("وحشی بافقی", "Vahshi Bafqi"),
];

#[derive(Debug, Clone, Deserialize)]
pub struct PoetNameEntry {
    pub persian: String,
    pub english: String,
}

#[derive(Debug, Deserialize)]
struct PoetNameFile {
    entries: Vec<PoetNameEntry>,
}

#[derive(Debug, thiserror::Error)]
pub enum PoetNamesError {
    #[error("poet names IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("poet names parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

pub struct PoetNames {
    entries: Vec<PoetNameEntry>,
}

impl Default for PoetNames {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PoetNames {
    pub fn builtin() -> Self {
        Self {
            entries: BUILTIN
                .iter()
                .map(|(fa, en)| PoetNameEntry {
                    persian: (*fa).to_string(),
                    english: (*en).to_string(),
                })
                .collect(),
        }
    }

    /// Built-in table plus the entries of a JSON file `{"entries":[{persian, english}]}`.
    /// File entries take precedence.
    pub fn load_with_file(path: &Path) -> Result<Self, PoetNamesError> {
        let content = std::fs::read_to_string(path)?;
        let file: PoetNameFile = serde_json::from_str(&content)?;
        let mut names = Self::builtin();
        let mut entries = file.entries;
        entries.append(&mut names.entries);
        names.entries = entries;
        Ok(names)
    }

    /// Name of `name` in `target`. Exact match first, then the first entry
    /// contained in `name` (e.g. a full honorific name).
    pub fn lookup(&self, name: &str, target: Language) -> Option<String> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let lowered = name.to_lowercase();
        self.entries
            .iter()
            .find(|e| pick(target, e).0.to_lowercase() == lowered)
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|e| lowered.contains(&pick(target, e).0.to_lowercase()))
            })
            .map(|e| pick(target, e).1.clone())
    }
}

/// `(from, to)` names of an entry for translating into `target`.
fn pick(target: Language, e: &PoetNameEntry) -> (&String, &String) {
    match target {
        Language::English => (&e.persian, &e.english),
        Language::Persian => (&e.english, &e.persian),
    }
}
