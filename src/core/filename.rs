use regex::Regex;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

use linkgrab_core::models::media::MediaKind;

static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

const MAX_STEM_CHARS: usize = 120;

pub fn sanitize_path_component(name: &str) -> String {
    let name: String = name.nfc().collect();
    let name = name.trim().replace(['\t', '\n', '\r'], "");
    let name = WS_RE.replace_all(&name, " ");

    let name = name.trim_end_matches([' ', '-', '.', ';']);

    let forbidden: &[(char, char)] = &[
        ('<', '＜'),
        ('>', '＞'),
        (':', '꞉'),
        ('"', '＂'),
        ('/', '⧸'),
        ('\\', '＼'),
        ('|', '｜'),
        ('?', '？'),
        ('*', ' '),
    ];

    let mut result = name.to_string();
    for (from, to) in forbidden {
        result = result.replace(*from, &to.to_string());
    }

    result.trim().to_string()
}

/// Local file name for a plain HTTP download: the URL's last path segment,
/// percent-decoded and sanitized, falling back to `media.<ext>`.
pub fn file_name_from_url(url: &str, kind: MediaKind) -> String {
    let segment = url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut s| s.next_back().map(|seg| seg.to_string()))
        })
        .unwrap_or_default();

    let decoded = urlencoding::decode(&segment)
        .map(|s| s.into_owned())
        .unwrap_or(segment);
    let cleaned = sanitize_path_component(&decoded);

    let (stem, ext) = match cleaned.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => (stem.to_string(), ext.to_lowercase()),
        _ => (cleaned.clone(), kind.default_extension().to_string()),
    };
    let stem: String = stem.chars().take(MAX_STEM_CHARS).collect();
    let stem = if stem.trim().is_empty() { "media".to_string() } else { stem };

    format!("{}.{}", stem, ext)
}
