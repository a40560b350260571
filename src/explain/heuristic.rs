//! Offline explanation generator.
//!
//! Themes come from an ordered table of keyword rules matched against the
//! poem text (Persian and English keywords alike), with a default row when
//! nothing matches. Prose is assembled from per-theme templates in the
//! requested language.

use crate::poem::{Language, Poem};

use super::types::{
    BeytReading, Claim, EvidencedText, Explanation, ExplanationOrigin, FullTafsir, GlossaryTerm,
    LineMeaning, Reading, ReadingKind, TafsirMeta,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Theme {
    Love,
    Wine,
    Mysticism,
    Separation,
    Transience,
    Nature,
    Wisdom,
    HumanExperience,
}

pub struct ThemeRule {
    pub theme: Theme,
    pub persian: &'static [&'static str],
    pub english: &'static [&'static str],
}

/// Evaluated in order; the first matching rule is the poem's primary theme.
pub const THEME_RULES: &[ThemeRule] = &[
    ThemeRule {
        theme: Theme::Love,
        persian: &["عشق", "معشوق", "یار", "دلبر", "جانان", "نگار", "عاشق"],
        english: &["love", "beloved", "lover"],
    },
    ThemeRule {
        theme: Theme::Wine,
        persian: &["می", "باده", "ساقی", "جام", "پیاله", "میخانه", "خرابات", "شراب"],
        english: &["wine", "cup", "cupbearer", "tavern", "goblet"],
    },
    ThemeRule {
        theme: Theme::Mysticism,
        persian: &["خدا", "حق", "عرفان", "فنا", "وصال", "درویش", "صوفی", "سبحان", "ازل"],
        english: &["god", "divine", "soul", "spirit", "eternal", "mystic"],
    },
    ThemeRule {
        theme: Theme::Separation,
        persian: &["فراق", "هجر", "جدایی", "دوری", "شکایت", "نالیده", "نفیر"],
        english: &["separation", "longing", "parted", "exile", "lament"],
    },
    ThemeRule {
        theme: Theme::Transience,
        persian: &["عمر", "روزگار", "مرگ", "فردا", "دم", "قافله", "فانی"],
        english: &["time", "life", "death", "tomorrow", "fleeting", "moment"],
    },
    ThemeRule {
        theme: Theme::Nature,
        persian: &["گل", "بلبل", "باغ", "بهار", "صبا", "نسیم", "سرو", "چمن"],
        english: &["rose", "nightingale", "garden", "spring", "breeze", "cypress"],
    },
    ThemeRule {
        theme: Theme::Wisdom,
        persian: &["دانا", "دانش", "خرد", "حکمت", "نفس", "آدم"],
        english: &["wisdom", "knowledge", "reason", "humanity", "virtue"],
    },
];

const PUNCTUATION: &[char] = &[
    '.', ',', '،', '؛', ';', ':', '!', '?', '؟', '«', '»', '"', '\'', '(', ')', '-',
];

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || PUNCTUATION.contains(&c))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Endings a keyword may carry and still count as the same word
/// (Persian plurals and possessives, English plurals).
const INFLECTIONS: &[&str] = &[
    "ها", "های", "ان", "ی", "یی", "ای", "م", "ت", "ش", "اش", "مان", "تان", "شان", "ست", "s",
    "es",
];

/// Keywords match whole words only. Those of three letters or more may also
/// carry one of `INFLECTIONS`; shorter ones are too ambiguous (Persian "می"
/// is also a verb prefix).
fn keyword_hit(words: &[String], keyword: &str) -> bool {
    let inflectable = keyword.chars().count() >= 3;
    words.iter().any(|w| {
        w == keyword
            || (inflectable
                && w.strip_prefix(keyword)
                    .map(|rest| rest.trim_start_matches('\u{200c}'))
                    .is_some_and(|rest| INFLECTIONS.contains(&rest)))
    })
}

impl ThemeRule {
    pub fn keywords(&self) -> impl Iterator<Item = &'static str> {
        self.persian.iter().chain(self.english.iter()).copied()
    }

    /// Keywords of this rule found in `text`.
    pub fn hits(&self, text: &str) -> Vec<&'static str> {
        let words = tokens(text);
        self.keywords()
            .filter(|k| keyword_hit(&words, k))
            .collect()
    }

    pub fn matches(&self, text: &str) -> bool {
        !self.hits(text).is_empty()
    }
}

/// Themes of `text` in table order; `HumanExperience` when nothing matches.
pub fn detect_themes(text: &str) -> Vec<Theme> {
    let themes: Vec<Theme> = THEME_RULES
        .iter()
        .filter(|r| r.matches(text))
        .map(|r| r.theme)
        .collect();
    if themes.is_empty() {
        vec![Theme::HumanExperience]
    } else {
        themes
    }
}

fn rule_for(theme: Theme) -> Option<&'static ThemeRule> {
    THEME_RULES.iter().find(|r| r.theme == theme)
}

struct ThemeText {
    label: &'static str,
    general: &'static str,
    imagery: &'static str,
    line_hints: &'static [&'static str],
}

fn theme_text(theme: Theme, language: Language) -> ThemeText {
    use Language::*;
    use Theme::*;
    match (theme, language) {
        (Love, English) => ThemeText {
            label: "Love and the beloved",
            general: "The poem circles around love as both joy and ordeal: the lover is drawn toward a beloved who remains just out of reach.",
            imagery: "The beloved's face, hair and glance stand for a beauty that both reveals and conceals the divine.",
            line_hints: &["the lover addresses the beloved", "desire is shown as a trial of the heart", "the beloved's beauty overwhelms the speaker"],
        },
        (Love, Persian) => ThemeText {
            label: "عشق و معشوق",
            general: "شعر بر محور عشق می‌چرخد؛ عشقی که هم شادی است و هم رنج، و عاشق را به سوی معشوقی دست‌نیافتنی می‌کشد.",
            imagery: "چهره، زلف و نگاه معشوق نماد زیبایی‌ای است که حقیقت را هم آشکار و هم پنهان می‌کند.",
            line_hints: &["عاشق معشوق را خطاب می‌کند", "دلدادگی چون آزمونی برای دل تصویر شده است", "زیبایی معشوق گوینده را از خود بی‌خود می‌کند"],
        },
        (Wine, English) => ThemeText {
            label: "Wine, the cup and the tavern",
            general: "Wine and the cupbearer signal a release from outward piety toward an inner, ecstatic knowledge.",
            imagery: "The cup and the tavern are classic symbols of spiritual intoxication rather than literal drinking.",
            line_hints: &["the cupbearer is called upon for relief", "intoxication stands for surrender of the self", "the tavern is set against the pulpit"],
        },
        (Wine, Persian) => ThemeText {
            label: "می، جام و میخانه",
            general: "می و ساقی نشانه رهایی از زهد ظاهری و رسیدن به معرفتی درونی و سرمستانه است.",
            imagery: "جام و میخانه نمادهای کهن مستی معنوی‌اند، نه باده‌نوشی ظاهری.",
            line_hints: &["ساقی برای رهایی فراخوانده می‌شود", "مستی نشانه وانهادن خویشتن است", "میخانه در برابر محراب قرار می‌گیرد"],
        },
        (Mysticism, English) => ThemeText {
            label: "Mystical longing",
            general: "Beneath its surface the poem speaks of the soul's journey back toward its divine origin.",
            imagery: "Light, annihilation and union mark the stages of the mystic path.",
            line_hints: &["the soul remembers its origin", "the self must pass away to reach union", "the divine is sought beyond appearances"],
        },
        (Mysticism, Persian) => ThemeText {
            label: "شوق عرفانی",
            general: "در لایه‌ای زیرین، شعر از سفر جان به سوی سرچشمه الهی خود سخن می‌گوید.",
            imagery: "نور، فنا و وصال منزل‌های راه سلوک را نشان می‌دهند.",
            line_hints: &["جان اصل خویش را به یاد می‌آورد", "خویشتن باید فانی شود تا به وصال برسد", "حقیقت در ورای ظاهر جست‌وجو می‌شود"],
        },
        (Separation, English) => ThemeText {
            label: "Separation and longing",
            general: "The speaker laments a separation from the source, and the lament itself becomes a song of return.",
            imagery: "The reed torn from its reed-bed is the emblem of every soul cut off from its home.",
            line_hints: &["the pain of separation is voiced", "the lament carries the hope of return", "others are moved by the speaker's cry"],
        },
        (Separation, Persian) => ThemeText {
            label: "جدایی و اشتیاق",
            general: "گوینده از جدایی از اصل خویش می‌نالد و همین ناله به سرود بازگشت بدل می‌شود.",
            imagery: "نیِ بریده از نیستان نماد هر جانی است که از خانه خود دور افتاده است.",
            line_hints: &["درد جدایی بیان می‌شود", "ناله امید بازگشت را در خود دارد", "دیگران از ناله گوینده متأثر می‌شوند"],
        },
        (Transience, English) => ThemeText {
            label: "The passing of time",
            general: "Life is shown as a caravan that never stops, urging the reader to seize the present moment.",
            imagery: "The caravan, the passing night and the cup of the moment figure the brevity of life.",
            line_hints: &["time is passing without pause", "the present moment is all one holds", "worry about tomorrow is set aside"],
        },
        (Transience, Persian) => ThemeText {
            label: "گذر عمر",
            general: "زندگی چون کاروانی بی‌درنگ تصویر شده و خواننده را به دریافتن دم حاضر فرا می‌خواند.",
            imagery: "کاروان، شبِ گذران و جام دم، کوتاهی عمر را می‌نمایانند.",
            line_hints: &["عمر بی‌درنگ می‌گذرد", "تنها دم حاضر در دست ماست", "غم فردا کنار گذاشته می‌شود"],
        },
        (Nature, English) => ThemeText {
            label: "Nature and the garden",
            general: "The garden and its creatures mirror the inner life of the speaker.",
            imagery: "Rose and nightingale, breeze and cypress carry the familiar code of beauty and longing.",
            line_hints: &["the garden reflects the speaker's heart", "the breeze carries a message", "the rose and nightingale restage love's drama"],
        },
        (Nature, Persian) => ThemeText {
            label: "طبیعت و باغ",
            general: "باغ و جانداران آن آینه‌ای از حال درونی گوینده‌اند.",
            imagery: "گل و بلبل، صبا و سرو رمزهای آشنای زیبایی و اشتیاق‌اند.",
            line_hints: &["باغ حال دل گوینده را بازمی‌تاباند", "صبا پیامی با خود می‌آورد", "گل و بلبل ماجرای عشق را بازمی‌آفرینند"],
        },
        (Wisdom, English) => ThemeText {
            label: "Wisdom and ethics",
            general: "The poem offers counsel: knowledge and right conduct are what give a human being worth.",
            imagery: "The body and its members, the wise and the young, make ethical ideas concrete.",
            line_hints: &["a moral lesson is stated", "knowledge is praised as strength", "the reader is urged toward right conduct"],
        },
        (Wisdom, Persian) => ThemeText {
            label: "خرد و اخلاق",
            general: "شعر پندی می‌دهد: دانش و کردار نیک است که به آدمی ارزش می‌بخشد.",
            imagery: "پیکر و اعضای آن، دانا و برنا، اندیشه‌های اخلاقی را ملموس می‌کنند.",
            line_hints: &["درسی اخلاقی بیان می‌شود", "دانش چون توانایی ستوده می‌شود", "خواننده به نیک‌کرداری فراخوانده می‌شود"],
        },
        (HumanExperience, English) => ThemeText {
            label: "Human experience",
            general: "The poem reflects on the human condition, its hopes and its limits, in the compressed manner of classical verse.",
            imagery: "Everyday images are raised into symbols of the inner life.",
            line_hints: &["the speaker reflects on their situation", "an image is offered for the reader to contemplate", "the thought of the previous line is deepened"],
        },
        (HumanExperience, Persian) => ThemeText {
            label: "تجربه انسانی",
            general: "شعر به شیوه فشرده شعر کلاسیک درباره حال آدمی، امیدها و محدودیت‌هایش می‌اندیشد.",
            imagery: "تصویرهای روزمره به نمادهایی از زندگی درونی بدل شده‌اند.",
            line_hints: &["گوینده در حال خویش تأمل می‌کند", "تصویری برای تأمل خواننده پیش نهاده می‌شود", "اندیشه مصراع پیشین ژرف‌تر می‌شود"],
        },
    }
}

/// Repeated closing word across the second lines of two or more couplets.
fn radif(poem: &Poem) -> Option<String> {
    let couplets = poem.couplets();
    let endings: Vec<&str> = couplets
        .iter()
        .filter(|c| c.len() == 2)
        .filter_map(|c| c[1].split_whitespace().last())
        .collect();
    match endings.first() {
        Some(first) if endings.len() >= 2 && endings.iter().all(|e| e == first) => {
            Some((*first).to_string())
        }
        _ => None,
    }
}

fn devices_text(poem: &Poem, language: Language) -> String {
    match (radif(poem), language) {
        (Some(word), Language::English) => {
            format!("The refrain (radif) \"{word}\" closes every couplet and binds the poem together.")
        }
        (Some(word), Language::Persian) => {
            format!("ردیف «{word}» در پایان هر بیت تکرار می‌شود و شعر را یکپارچه می‌کند.")
        }
        (None, Language::English) => {
            "Parallel half-lines and symbolic imagery carry the meaning more than direct statement.".into()
        }
        (None, Language::Persian) => {
            "قرینه‌سازی مصراع‌ها و تصویرهای نمادین بیش از بیان مستقیم بار معنا را می‌کشند.".into()
        }
    }
}

fn line_meaning(theme: &ThemeText, index: usize, language: Language) -> String {
    let hint = theme.line_hints[index % theme.line_hints.len()];
    match language {
        Language::English => format!("In line {}, {hint}.", index + 1),
        Language::Persian => format!("در مصراع {}، {hint}.", index + 1),
    }
}

/// Deterministic simple-tier explanation. Always non-empty.
pub fn explain(poem: &Poem, language: Language) -> Explanation {
    let themes = detect_themes(&poem.text);
    let texts: Vec<ThemeText> = themes.iter().map(|t| theme_text(*t, language)).collect();
    let primary = &texts[0];

    let separator = match language {
        Language::English => ", ",
        Language::Persian => "، ",
    };
    let intro = match language {
        Language::English => format!("\"{}\" by {}: ", poem.title, poem.poet.name),
        Language::Persian => format!("«{}» از {}: ", poem.title, poem.poet.name),
    };

    Explanation {
        line_by_line: poem
            .lines()
            .into_iter()
            .enumerate()
            .map(|(i, line)| LineMeaning {
                original: line.to_string(),
                meaning: line_meaning(primary, i, language),
            })
            .collect(),
        general_meaning: format!("{intro}{}", primary.general),
        main_themes: texts.iter().map(|t| t.label).collect::<Vec<_>>().join(separator),
        imagery_symbols: texts.iter().map(|t| t.imagery).collect::<Vec<_>>().join(" "),
        literary_devices: Some(devices_text(poem, language)),
        origin: ExplanationOrigin::Local,
    }
}

/// Couplets (1-based) containing any keyword of `theme`.
fn evidence_for(poem: &Poem, theme: Theme) -> Vec<usize> {
    let Some(rule) = rule_for(theme) else {
        return Vec::new();
    };
    poem.couplets()
        .iter()
        .enumerate()
        .filter(|(_, lines)| rule.matches(&lines.join("\n")))
        .map(|(i, _)| i + 1)
        .collect()
}

fn reading_kind(theme: Theme) -> ReadingKind {
    match theme {
        Theme::Love => ReadingKind::Romantic,
        Theme::Wine | Theme::Mysticism | Theme::Separation => ReadingKind::Mystical,
        Theme::Transience => ReadingKind::Philosophical,
        Theme::Wisdom => ReadingKind::Social,
        Theme::Nature | Theme::HumanExperience => ReadingKind::Literal,
    }
}

/// Deterministic full tafsir. Every claim cites couplets inside the poem.
pub fn tafsir(poem: &Poem, language: Language) -> FullTafsir {
    let couplet_count = poem.couplet_count();
    let simple = explain(poem, language);
    let themes = detect_themes(&poem.text);
    let primary = themes[0];
    let fallback_evidence: Vec<usize> = if couplet_count > 0 { vec![1] } else { Vec::new() };

    let evidence_or_first = |theme: Theme| {
        let ev = evidence_for(poem, theme);
        if ev.is_empty() {
            fallback_evidence.clone()
        } else {
            ev
        }
    };

    let theme_claims: Vec<Claim> = themes
        .iter()
        .map(|&t| {
            let text = theme_text(t, language);
            Claim {
                label: text.label.to_string(),
                explanation: text.general.to_string(),
                evidence: evidence_or_first(t),
            }
        })
        .collect();

    let mut symbols = Vec::new();
    let mut glossary = Vec::new();
    for &theme in &themes {
        let Some(rule) = rule_for(theme) else { continue };
        let label = theme_text(theme, language).label;
        for keyword in rule.hits(&poem.text) {
            let evidence: Vec<usize> = poem
                .couplets()
                .iter()
                .enumerate()
                .filter(|(_, lines)| keyword_hit(&tokens(&lines.join("\n")), keyword))
                .map(|(i, _)| i + 1)
                .collect();
            if evidence.is_empty() {
                continue;
            }
            let meaning = match language {
                Language::English => format!("a conventional image of {}", label.to_lowercase()),
                Language::Persian => format!("تصویری قراردادی از {label}"),
            };
            symbols.push(Claim {
                label: keyword.to_string(),
                explanation: meaning.clone(),
                evidence,
            });
            glossary.push(GlossaryTerm {
                term: keyword.to_string(),
                meaning,
            });
        }
    }

    let devices = vec![Claim {
        label: match (radif(poem), language) {
            (Some(_), Language::English) => "Radif (refrain)".to_string(),
            (Some(_), Language::Persian) => "ردیف".to_string(),
            (None, Language::English) => "Symbolic imagery".to_string(),
            (None, Language::Persian) => "تصویرپردازی نمادین".to_string(),
        },
        explanation: simple.literary_devices.clone().unwrap_or_default(),
        evidence: if radif(poem).is_some() {
            (1..=couplet_count).collect()
        } else {
            fallback_evidence.clone()
        },
    }];

    let per_beyt = poem
        .couplets()
        .iter()
        .enumerate()
        .map(|(i, lines)| {
            let joined = lines.join("\n");
            let beyt_theme = detect_themes(&joined)[0];
            let text = theme_text(beyt_theme, language);
            BeytReading {
                index: i + 1,
                text: joined,
                readings: vec![
                    Reading {
                        kind: ReadingKind::Literal,
                        text: line_meaning(&text, i, language),
                        confidence: 0.8,
                    },
                    Reading {
                        kind: reading_kind(beyt_theme),
                        text: text.imagery.to_string(),
                        confidence: if beyt_theme == Theme::HumanExperience { 0.3 } else { 0.6 },
                    },
                ],
            }
        })
        .collect();

    let uncertainty = match language {
        Language::English => "This reading was produced offline from keyword cues; it cannot weigh historical context or competing scholarly interpretations, and no translation is available.".to_string(),
        Language::Persian => "این خوانش به‌صورت آفلاین و بر پایه نشانه‌های واژگانی فراهم شده است؛ بافت تاریخی و تفسیرهای رقیب را نمی‌سنجد و ترجمه‌ای در دسترس نیست.".to_string(),
    };

    FullTafsir {
        meta: TafsirMeta {
            poet: poem.poet.full_name.clone(),
            title: poem.title.clone(),
            form: None,
            meter: None,
            era: None,
        },
        overall_meaning: EvidencedText {
            text: simple.general_meaning,
            evidence: evidence_or_first(primary),
        },
        themes: theme_claims,
        symbols,
        devices,
        per_beyt,
        glossary,
        uncertainty,
        translation: if poem.language == Language::English {
            poem.text.clone()
        } else {
            String::new()
        },
        origin: ExplanationOrigin::Local,
    }
}
