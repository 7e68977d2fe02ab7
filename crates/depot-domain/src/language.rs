//! Extension-to-language mapping used by the repository statistics scan.

use std::collections::BTreeMap;

/// Map a file extension (without the dot) to a display language name.
pub fn language_for_extension(ext: &str) -> Option<&'static str> {
    let lang = match ext {
        "py" => "Python",
        "js" => "JavaScript",
        "ts" => "TypeScript",
        "java" => "Java",
        "cpp" => "C++",
        "c" => "C",
        "cs" => "C#",
        "rb" => "Ruby",
        "go" => "Go",
        "php" => "PHP",
        "rs" => "Rust",
        "swift" => "Swift",
        "kt" => "Kotlin",
        "m" => "Objective-C",
        _ => return None,
    };
    Some(lang)
}

/// Convert per-language byte totals into percentages rounded to two decimals.
pub fn language_percentages(sizes: &BTreeMap<String, u64>) -> BTreeMap<String, f64> {
    let total: u64 = sizes.values().sum();
    sizes
        .iter()
        .map(|(lang, bytes)| {
            let pct = if total > 0 {
                #[allow(clippy::cast_precision_loss)]
                let ratio = *bytes as f64 / total as f64;
                (ratio * 10_000.0).round() / 100.0
            } else {
                0.0
            };
            (lang.clone(), pct)
        })
        .collect()
}
