//! Explanation shapes: the light line-by-line breakdown and the full tafsir.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Depth {
    Simple,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplanationOrigin {
    #[default]
    Remote,
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineMeaning {
    pub original: String,
    pub meaning: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Explanation {
    pub line_by_line: Vec<LineMeaning>,
    pub general_meaning: String,
    pub main_themes: String,
    pub imagery_symbols: String,
    #[serde(default)]
    pub literary_devices: Option<String>,
    #[serde(default)]
    pub origin: ExplanationOrigin,
}

// --- Full tafsir ---

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TafsirMeta {
    pub poet: String,
    pub title: String,
    pub form: Option<String>,
    pub meter: Option<String>,
    pub era: Option<String>,
}

/// A statement backed by 1-based couplet indices.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidencedText {
    pub text: String,
    pub evidence: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Claim {
    pub label: String,
    pub explanation: String,
    pub evidence: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingKind {
    Literal,
    Mystical,
    Romantic,
    Philosophical,
    Social,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub kind: ReadingKind,
    pub text: String,
    #[serde(default)]
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BeytReading {
    pub index: usize,
    pub text: String,
    pub readings: Vec<Reading>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlossaryTerm {
    pub term: String,
    pub meaning: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FullTafsir {
    pub meta: TafsirMeta,
    pub overall_meaning: EvidencedText,
    pub themes: Vec<Claim>,
    pub symbols: Vec<Claim>,
    pub devices: Vec<Claim>,
    pub per_beyt: Vec<BeytReading>,
    pub glossary: Vec<GlossaryTerm>,
    pub uncertainty: String,
    pub translation: String,
    #[serde(skip)]
    pub origin: ExplanationOrigin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TafsirViolation {
    MissingEvidence { section: &'static str, label: String },
    EvidenceOutOfRange { section: &'static str, label: String, index: usize },
    BeytOutOfRange { index: usize },
}

impl FullTafsir {
    fn claim_sections(&self) -> [(&'static str, &Vec<Claim>); 3] {
        [
            ("themes", &self.themes),
            ("symbols", &self.symbols),
            ("devices", &self.devices),
        ]
    }

    /// Every evidence-citation problem against a poem of `couplet_count` beyts.
    pub fn validate(&self, couplet_count: usize) -> Vec<TafsirViolation> {
        let in_range = |i: usize| i >= 1 && i <= couplet_count;
        let mut out = Vec::new();

        let mut check = |section: &'static str, label: &str, evidence: &[usize]| {
            if evidence.is_empty() {
                out.push(TafsirViolation::MissingEvidence {
                    section,
                    label: label.to_string(),
                });
            }
            for &index in evidence.iter().filter(|&&i| !in_range(i)) {
                out.push(TafsirViolation::EvidenceOutOfRange {
                    section,
                    label: label.to_string(),
                    index,
                });
            }
        };

        check("overall_meaning", "overall", &self.overall_meaning.evidence);
        for (section, claims) in self.claim_sections() {
            for claim in claims {
                check(section, &claim.label, &claim.evidence);
            }
        }
        for beyt in self.per_beyt.iter().filter(|b| !in_range(b.index)) {
            out.push(TafsirViolation::BeytOutOfRange { index: beyt.index });
        }
        out
    }

    /// Drops out-of-range citations and any claim left without evidence.
    /// An overall meaning without valid evidence is pinned to couplet 1.
    pub fn sanitize(mut self, couplet_count: usize) -> Self {
        let in_range = |i: &usize| *i >= 1 && *i <= couplet_count;
        let fix = |claims: &mut Vec<Claim>| {
            for claim in claims.iter_mut() {
                claim.evidence.retain(in_range);
                claim.evidence.sort_unstable();
                claim.evidence.dedup();
            }
            claims.retain(|c| !c.evidence.is_empty());
        };
        fix(&mut self.themes);
        fix(&mut self.symbols);
        fix(&mut self.devices);

        self.overall_meaning.evidence.retain(in_range);
        if self.overall_meaning.evidence.is_empty() && couplet_count > 0 {
            self.overall_meaning.evidence.push(1);
        }
        self.per_beyt.retain(|b| in_range(&b.index));
        for beyt in &mut self.per_beyt {
            for reading in &mut beyt.readings {
                reading.confidence = reading.confidence.clamp(0.0, 1.0);
            }
        }
        self
    }
}

// --- Cache envelope ---

#[derive(Debug, Clone, PartialEq)]
pub enum EntryState<T> {
    Loading,
    Ready(T),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub state: EntryState<T>,
    pub timestamp: DateTime<Utc>,
    pub(crate) seq: u64,
}

impl<T> CacheEntry<T> {
    pub fn is_loading(&self) -> bool {
        matches!(self.state, EntryState::Loading)
    }
}
