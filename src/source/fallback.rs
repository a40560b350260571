//! Offline poems served while the upstream is considered down.

use crate::poem::{html_from_text, Language, Poem, Poet};

/// Ids for local poems live far above the upstream's id space.
pub const FALLBACK_ID_BASE: u64 = 9_000_000;

const FALLBACK: &[(&str, &str, &str, &str)] = &[
    (
        "غزل شماره ۱",
        "حافظ",
        "خواجه شمس‌الدین محمد حافظ شیرازی",
        "الا یا ایها الساقی ادر کاسا و ناولها\nکه عشق آسان نمود اول ولی افتاد مشکل‌ها\nبه بوی نافه‌ای کاخر صبا زان طره بگشاید\nز تاب جعد مشکینش چه خون افتاد در دل‌ها",
    ),
    (
        "نی‌نامه",
        "مولانا",
        "جلال‌الدین محمد بلخی",
        "بشنو این نی چون شکایت می‌کند\nاز جدایی‌ها حکایت می‌کند\nکز نیستان تا مرا ببریده‌اند\nدر نفیرم مرد و زن نالیده‌اند",
    ),
    (
        "بنی آدم",
        "سعدی",
        "ابومحمد مشرف‌الدین مصلح سعدی شیرازی",
        "بنی آدم اعضای یکدیگرند\nکه در آفرینش ز یک گوهرند\nچو عضوی به درد آورد روزگار\nدگر عضوها را نماند قرار",
    ),
    (
        "رباعی",
        "خیام",
        "حکیم عمر خیام نیشابوری",
        "این قافله عمر عجب می‌گذرد\nدریاب دمی که با طرب می‌گذرد\nساقی غم فردای حریفان چه خوری\nپیش آر پیاله را که شب می‌گذرد",
    ),
    (
        "دوبیتی",
        "باباطاهر",
        "باباطاهر همدانی",
        "دلا غافل ز سبحانی چه حاصل\nمطیع نفس و شیطانی چه حاصل\nبود قدر تو افزون از ملائک\nتو قدر خود نمی‌دانی چه حاصل",
    ),
    (
        "آغاز شاهنامه",
        "فردوسی",
        "حکیم ابوالقاسم فردوسی توسی",
        "توانا بود هر که دانا بود\nز دانش دل پیر برنا بود",
    ),
];

/// The local poem set, in a stable order.
pub fn fallback_poems() -> Vec<Poem> {
    FALLBACK
        .iter()
        .enumerate()
        .map(|(i, (title, name, full_name, text))| Poem {
            id: FALLBACK_ID_BASE + i as u64 + 1,
            language: Language::Persian,
            title: (*title).to_string(),
            text: (*text).to_string(),
            html_text: html_from_text(text),
            poet: Poet {
                id: None,
                name: (*name).to_string(),
                full_name: (*full_name).to_string(),
            },
        })
        .collect()
}
