use std::sync::LazyLock;

use linkgrab_core::platforms::Platform;
use regex::Regex;

pub const DIRECT_FILE_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "webm", "avi", "mov", "wmv", "flv", "mp3", "m4a", "wav", "aac", "ogg",
];

const GENERIC_SHORTENERS: &[&str] = &[
    "t.co",
    "bit.ly",
    "tinyurl.com",
    "lnkd.in",
    "goo.gl",
    "rb.gy",
    "ow.ly",
    "is.gd",
];

static URL_IN_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)https?://[^\s<>'"()\[\]{}]+"#).expect("valid regex"));

static TIKTOK_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^https?://(?:(?:www|m)\.)?tiktok\.com/(?:@[\w.-]+/video/\d+|video/\d+|v/\d+|embed/(?:v2/)?\d+)(?:[/?#]|$)",
    )
    .expect("valid regex")
});

static INSTAGRAM_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^https?://(?:www\.)?instagram\.com/(?:(?:p|reel|tv)/[\w-]+|stories/[\w.]+/\d+)(?:[/?#]|$)",
    )
    .expect("valid regex")
});

static FACEBOOK_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^https?://(?:(?:www|m|web)\.)?facebook\.com/(?:[^/?#]+/videos/(?:[^/?#]+/)?\d+|video\.php\?(?:[^#]*&)?v=\d+|watch/?\?(?:[^#]*&)?v=\d+)",
    )
    .expect("valid regex")
});

static TWITTER_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^https?://(?:(?:www|mobile)\.)?(?:twitter|x)\.com/\w+/status/\d+(?:[/?#]|$)")
        .expect("valid regex")
});

static VK_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^https?://(?:(?:www|m)\.)?(?:vk\.com|vkvideo\.ru)/(?:video-?\d+_\d+|clip-?\d+_\d+|wall-?\d+_\d+|(?:[^#]*[?&/])?z=video-?\d+_\d+)",
    )
    .expect("valid regex")
});

static REDDIT_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^https?://(?:(?:(?:www|old|new|m)\.)?reddit\.com/(?:r/\w+/)?comments/\w+/[^/?#]+|v\.redd\.it/\w+)(?:[/?#]|$)",
    )
    .expect("valid regex")
});

static PINTEREST_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^https?://(?:[\w-]+\.)?pinterest\.[a-z.]+/pin/[\w-]+(?:[/?#]|$)")
        .expect("valid regex")
});

static DAILYMOTION_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^https?://(?:www\.)?dailymotion\.com/(?:embed/)?video/[\w-]+(?:[/?#]|$)")
        .expect("valid regex")
});

static VIMEO_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^https?://(?:www\.)?vimeo\.com/(?:\d+|album/\d+/video/\d+|channels/[^/?#]+/\d+|ondemand/[^/?#]+/\d+)(?:[/?#]|$)",
    )
    .expect("valid regex")
});

static SOUNDCLOUD_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^https?://(?:(?:www|m)\.)?soundcloud\.com/[\w-]+/(?:sets/[\w-]+|[\w-]+)(?:[/?#]|$)")
        .expect("valid regex")
});

static YOUTUBE_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^https?://(?:(?:(?:www|m|music)\.)?youtube\.com/(?:watch\?(?:[^#]*&)?v=|shorts/|embed/|v/)|youtu\.be/)[\w-]{6,}",
    )
    .expect("valid regex")
});

/// True when the URL path ends in a known audio/video file extension.
pub fn is_direct_file(url: &str) -> bool {
    let Ok(parsed) = url::Url::parse(url) else {
        return false;
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }
    let path = parsed.path().to_lowercase();
    let file_name = path.rsplit('/').next().unwrap_or_default();
    match file_name.rsplit_once('.') {
        Some((stem, ext)) => !stem.is_empty() && DIRECT_FILE_EXTENSIONS.contains(&ext),
        None => false,
    }
}

pub fn matches_shape(platform: Platform, url: &str) -> bool {
    let re: &Regex = match platform {
        Platform::TikTok => &TIKTOK_SHAPE,
        Platform::Instagram => &INSTAGRAM_SHAPE,
        Platform::Facebook => &FACEBOOK_SHAPE,
        Platform::Twitter => &TWITTER_SHAPE,
        Platform::Vk => &VK_SHAPE,
        Platform::Reddit => &REDDIT_SHAPE,
        Platform::Pinterest => &PINTEREST_SHAPE,
        Platform::Dailymotion => &DAILYMOTION_SHAPE,
        Platform::Vimeo => &VIMEO_SHAPE,
        Platform::SoundCloud => &SOUNDCLOUD_SHAPE,
        Platform::YouTube => &YOUTUBE_SHAPE,
        Platform::DirectFile => return is_direct_file(url),
    };
    re.is_match(url)
}

/// Admission check: the platform whose accepted shape this URL has, if any.
/// Direct files win over host detection.
pub fn classify_url(url: &str) -> Option<Platform> {
    if is_direct_file(url) {
        return Some(Platform::DirectFile);
    }
    let platform = Platform::from_url(url)?;
    matches_shape(platform, url).then_some(platform)
}

fn identity_keys(platform: Option<Platform>) -> &'static [&'static str] {
    match platform {
        Some(Platform::YouTube) => &["v"],
        Some(Platform::Facebook) => &["v"],
        Some(Platform::Vk) => &["z"],
        _ => &[],
    }
}

/// Drops the fragment and every query parameter except the few that identify
/// the media itself (YouTube `v`, Facebook `v`, VK `z`). Idempotent.
pub fn strip_tracking(url: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(url) else {
        return url.to_string();
    };
    let keep = identity_keys(Platform::from_url(url));

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| keep.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    parsed.set_fragment(None);
    parsed.set_query(None);
    if !kept.is_empty() {
        let mut pairs = parsed.query_pairs_mut();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
    }
    parsed.to_string()
}

/// First http(s) URL in free-form text, without trailing sentence punctuation.
pub fn find_first_url(text: &str) -> Option<&str> {
    let m = URL_IN_TEXT.find(text)?;
    let url = m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']);
    (!url.is_empty()).then_some(url)
}

fn host_of(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    Some(parsed.host_str()?.trim_start_matches("www.").to_lowercase())
}

pub fn is_generic_shortener(url: &str) -> bool {
    host_of(url)
        .map(|h| GENERIC_SHORTENERS.contains(&h.as_str()))
        .unwrap_or(false)
}

/// Platform-owned short or share links that only make sense after following
/// their redirect.
pub fn is_platform_shortener(platform: Platform, url: &str) -> bool {
    let Some(host) = host_of(url) else {
        return false;
    };
    let path = url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_default();

    match platform {
        Platform::TikTok => {
            host == "vm.tiktok.com"
                || host == "vt.tiktok.com"
                || path.starts_with("/t/")
                || path.starts_with("/share/")
        }
        Platform::Pinterest => host == "pin.it",
        Platform::Facebook => host == "fb.watch" || path.starts_with("/share/"),
        Platform::Dailymotion => host == "dai.ly",
        Platform::Reddit => host == "redd.it" || path.contains("/s/"),
        Platform::Instagram => host == "instagr.am",
        Platform::Twitter => path.starts_with("/i/"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_file_by_extension() {
        assert!(is_direct_file("https://cdn.example.com/clips/a.mp4"));
        assert!(is_direct_file("https://cdn.example.com/a.MP3?token=1#t=3"));
        assert!(!is_direct_file("https://cdn.example.com/a.mp4/view"));
        assert!(!is_direct_file("https://cdn.example.com/.mp4"));
        assert!(!is_direct_file("ftp://cdn.example.com/a.mp4"));
        assert!(!is_direct_file("https://example.com/watch"));
    }

    #[test]
    fn accepted_shapes() {
        let cases = [
            ("https://www.tiktok.com/@some.user/video/7301234567890123456", Platform::TikTok),
            ("https://www.tiktok.com/embed/v2/7301234567890123456", Platform::TikTok),
            ("https://www.instagram.com/reel/Cxyz_12-a/", Platform::Instagram),
            ("https://www.instagram.com/stories/someone/3210987654321/", Platform::Instagram),
            ("https://www.facebook.com/somepage/videos/1234567890/", Platform::Facebook),
            ("https://www.facebook.com/watch/?v=1234567890", Platform::Facebook),
            ("https://x.com/someone/status/1790000000000000000", Platform::Twitter),
            ("https://vk.com/video-12345_67890", Platform::Vk),
            ("https://vk.com/club1?z=video-12345_67890", Platform::Vk),
            ("https://www.reddit.com/r/videos/comments/abc123/some_title/", Platform::Reddit),
            ("https://v.redd.it/abc123xyz", Platform::Reddit),
            ("https://www.pinterest.com/pin/123456789012345678/", Platform::Pinterest),
            ("https://www.dailymotion.com/video/x8abcd1", Platform::Dailymotion),
            ("https://vimeo.com/123456789", Platform::Vimeo),
            ("https://vimeo.com/channels/staffpicks/123456", Platform::Vimeo),
            ("https://soundcloud.com/artist/track-name", Platform::SoundCloud),
            ("https://soundcloud.com/artist/sets/album", Platform::SoundCloud),
            ("https://www.youtube.com/watch?v=dQw4w9WgXcQ", Platform::YouTube),
            ("https://youtu.be/dQw4w9WgXcQ", Platform::YouTube),
            ("https://www.youtube.com/shorts/abcdefghijk", Platform::YouTube),
            ("https://cdn.example.com/file.webm", Platform::DirectFile),
        ];
        for (url, expected) in cases {
            assert_eq!(classify_url(url), Some(expected), "{}", url);
        }
    }

    #[test]
    fn rejected_shapes() {
        for url in [
            "https://www.tiktok.com/@some.user",
            "https://www.tiktok.com/tag/funny",
            "https://www.instagram.com/someone/",
            "https://x.com/someone",
            "https://www.youtube.com/@channel",
            "https://vimeo.com/123abc",
            "https://www.facebook.com/somepage",
            "https://example.com/page",
        ] {
            assert_eq!(classify_url(url), None, "{}", url);
        }
    }

    #[test]
    fn strips_tracking_but_keeps_identity() {
        assert_eq!(
            strip_tracking("https://www.youtube.com/watch?v=dQw4w9WgXcQ&si=abc&feature=share#t=1"),
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        );
        assert_eq!(
            strip_tracking("https://x.com/u/status/1?s=20&t=xyz"),
            "https://x.com/u/status/1"
        );
        assert_eq!(
            strip_tracking("https://www.facebook.com/watch/?v=123&ref=sharing"),
            "https://www.facebook.com/watch/?v=123"
        );
    }

    #[test]
    fn strip_is_idempotent() {
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ&si=abc",
            "https://www.tiktok.com/@u/video/123456789?is_from_webapp=1",
            "https://vk.com/club1?z=video-1_2&w=wall",
        ] {
            let once = strip_tracking(url);
            assert_eq!(strip_tracking(&once), once);
        }
    }

    #[test]
    fn finds_first_url_in_text() {
        assert_eq!(
            find_first_url("look at this: https://youtu.be/dQw4w9WgXcQ. nice"),
            Some("https://youtu.be/dQw4w9WgXcQ")
        );
        assert_eq!(
            find_first_url("(https://x.com/a/status/1) and http://b.com"),
            Some("https://x.com/a/status/1")
        );
        assert_eq!(find_first_url("no links here"), None);
    }

    #[test]
    fn shorteners() {
        assert!(is_generic_shortener("https://t.co/AbCdEf"));
        assert!(is_generic_shortener("https://bit.ly/3xyz"));
        assert!(!is_generic_shortener("https://x.com/a/status/1"));
        assert!(is_platform_shortener(Platform::TikTok, "https://vm.tiktok.com/ZMabc123/"));
        assert!(is_platform_shortener(Platform::TikTok, "https://www.tiktok.com/t/ZTabc/"));
        assert!(is_platform_shortener(Platform::Pinterest, "https://pin.it/1a2b3c"));
        assert!(!is_platform_shortener(Platform::YouTube, "https://youtu.be/dQw4w9WgXcQ"));
    }
}
