//! Page-scraping strategies used when a link is neither canonical nor a
//! redirect. Each strategy is a pure function over the page body returning the
//! first candidate URL it can find; callers decide whether the candidate is
//! acceptable.

use std::sync::LazyLock;

use linkgrab_core::platforms::Platform;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;

pub type Strategy = fn(&str) -> Option<String>;

const MAX_JSON_DEPTH: usize = 10;

static LD_JSON: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"script[type="application/ld+json"]"#).expect("valid selector")
});
static SIGI_STATE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("script#SIGI_STATE").expect("valid selector"));
static UNIVERSAL_DATA: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("script#__UNIVERSAL_DATA_FOR_REHYDRATION__").expect("valid selector")
});
static JSON_SCRIPT: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"script[type="application/json"]"#).expect("valid selector")
});
static OG_URL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[property="og:url"]"#).expect("valid selector"));
static OG_VIDEO: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(
        r#"meta[property="og:video"], meta[property="og:video:url"], meta[property="og:video:secure_url"]"#,
    )
    .expect("valid selector")
});

static SIGI_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:window\.)?SIGI_STATE\s*=\s*").expect("valid regex"));
static SIGI_ITEM_MODULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)"ItemModule"\s*:\s*(\{.*?\})\s*,"#).expect("valid regex"));
static REDDIT_STATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)window\.___r\s*=\s*(\{.*?\});").expect("valid regex"));
static INSTAGRAM_STATE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?s)window\.__additionalDataLoaded\([^,]+,\s*(\{.+?\})\);",
        r"(?s)window\.__initialDataLoaded\([^,]+,\s*(\{.+?\})\);",
        r"(?s)window\.__sharedData\s*=\s*(\{.+?\});",
        r"(?s)window\._sharedData\s*=\s*(\{.+?\});",
        r"(?s)window\.__graphql__\s*=\s*(\{.+?\});",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});
static ITEM_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"itemId["']?\s*[:=]\s*["']?(\d{6,})"#).expect("valid regex"));
static UNIQUE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""uniqueId"\s*:\s*"([^"]+)""#).expect("valid regex"));
static USER_VIDEO_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/@([\w.-]+)/video/(\d{6,})").expect("valid regex"));

/// Ordered strategies for a platform's landing pages. First hit wins.
pub fn strategies_for(platform: Platform) -> &'static [Strategy] {
    match platform {
        Platform::TikTok => &[ld_json, tiktok_state, og_url, id_handle_scan],
        Platform::Reddit => &[reddit_state, ld_json, og_video, og_url],
        Platform::Instagram => &[ld_json, instagram_state, og_url],
        Platform::DirectFile => &[],
        _ => &[ld_json, og_url, og_video],
    }
}

fn script_bodies(html: &str, selector: &Selector) -> Vec<String> {
    let doc = Html::parse_document(html);
    doc.select(selector)
        .map(|el| el.text().collect::<String>())
        .filter(|t| !t.trim().is_empty())
        .collect()
}

fn meta_content(html: &str, selector: &Selector) -> Option<String> {
    let doc = Html::parse_document(html);
    doc.select(selector)
        .filter_map(|el| el.value().attr("content"))
        .map(str::trim)
        .find(|c| c.starts_with("http"))
        .map(str::to_string)
}

fn parse_lenient(text: &str) -> Option<Value> {
    let text = text.trim();
    serde_json::from_str(text)
        .ok()
        .or_else(|| serde_json::from_str(&text.replace('\n', "")).ok())
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn pick_from_ld(obj: &Value) -> Option<String> {
    if let Some(cu) = str_at(obj, "/contentUrl") {
        return Some(cu.to_string());
    }
    if let Some(u) = str_at(obj, "/url") {
        if u.contains("/video/") {
            return Some(u.to_string());
        }
    }
    if let Some(graph) = obj.get("@graph").and_then(Value::as_array) {
        return graph.iter().find_map(pick_from_ld);
    }
    if let Some(video) = obj.get("video") {
        return match video {
            Value::Array(items) => items.iter().find_map(pick_from_ld),
            other => pick_from_ld(other),
        };
    }
    None
}

/// `application/ld+json` blocks: `contentUrl`, or a `url` pointing at a video page.
pub fn ld_json(html: &str) -> Option<String> {
    script_bodies(html, &LD_JSON)
        .iter()
        .filter_map(|body| parse_lenient(body))
        .find_map(|value| match &value {
            Value::Array(items) => items.iter().find_map(pick_from_ld),
            other => pick_from_ld(other),
        })
}

fn tiktok_url(handle: Option<&str>, id: &str) -> String {
    match handle {
        Some(h) => format!("https://www.tiktok.com/@{}/video/{}", h, id),
        None => format!("https://www.tiktok.com/video/{}", id),
    }
}

fn author_handle(item: &Value) -> Option<&str> {
    for key in ["/author", "/authorInfo", "/itemInfos/author"] {
        match item.pointer(key) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.as_str()),
            Some(obj @ Value::Object(_)) => {
                if let Some(h) = str_at(obj, "/uniqueId").or_else(|| str_at(obj, "/nickname")) {
                    return Some(h);
                }
            }
            _ => {}
        }
    }
    None
}

fn sigi_item_module(html: &str) -> Option<Value> {
    let body = script_bodies(html, &SIGI_STATE).into_iter().next()?;
    let body = SIGI_PREFIX.replace(&body, "");
    let body = body.trim_end_matches([';', '\n', ' ']);
    if let Some(state) = parse_lenient(body) {
        return state.get("ItemModule").cloned();
    }
    let caps = SIGI_ITEM_MODULE.captures(body)?;
    serde_json::from_str(caps.get(1)?.as_str()).ok()
}

/// TikTok embedded state: `SIGI_STATE` item module, then the newer
/// rehydration blob's video-detail scope.
pub fn tiktok_state(html: &str) -> Option<String> {
    if let Some(Value::Object(items)) = sigi_item_module(html) {
        for (key, item) in &items {
            let id = str_at(item, "/id")
                .or_else(|| str_at(item, "/itemInfos/id"))
                .unwrap_or(key.as_str());
            if id.is_empty() {
                continue;
            }
            return Some(tiktok_url(author_handle(item), id));
        }
    }

    let body = script_bodies(html, &UNIVERSAL_DATA).into_iter().next()?;
    let data = parse_lenient(&body)?;
    let item = data.pointer("/__DEFAULT_SCOPE__/webapp.video-detail/itemInfo/itemStruct")?;
    let id = str_at(item, "/id")?;
    Some(tiktok_url(author_handle(item), id))
}

fn reddit_video_from_post(post: &Value) -> Option<String> {
    for media_key in ["/media", "/secure_media"] {
        if let Some(media) = post.pointer(media_key) {
            if str_at(media, "/type") == Some("video") {
                if let Some(u) = str_at(media, "/content/url") {
                    return Some(u.to_string());
                }
            }
            if let Some(u) = str_at(media, "/reddit_video/fallback_url") {
                return Some(u.to_string());
            }
        }
    }
    post.pointer("/crosspost_parent_list/0")
        .and_then(reddit_video_from_post)
}

/// Reddit `window.___r` page state, post media then crosspost parent.
pub fn reddit_state(html: &str) -> Option<String> {
    let caps = REDDIT_STATE.captures(html)?;
    let data: Value = serde_json::from_str(caps.get(1)?.as_str()).ok()?;
    let post = data.pointer("/props/pageProps/postInfo/post")?;
    reddit_video_from_post(post)
}

/// Walks arbitrary JSON for a playable video URL. `video_versions` lists are
/// resolved to their widest entry.
pub fn find_video_url(data: &Value) -> Option<String> {
    find_video_url_at(data, 0)
}

fn find_video_url_at(data: &Value, depth: usize) -> Option<String> {
    if depth > MAX_JSON_DEPTH {
        return None;
    }
    match data {
        Value::Object(map) => {
            for key in ["video_url", "videoUrl", "contentUrl", "url", "src", "video_versions"] {
                match map.get(key) {
                    Some(Value::String(s))
                        if s.starts_with("http") && (s.contains(".mp4") || s.contains(".mov")) =>
                    {
                        return Some(s.clone());
                    }
                    Some(Value::Array(versions)) if key == "video_versions" => {
                        let best = versions
                            .iter()
                            .filter(|v| v.get("url").and_then(Value::as_str).is_some())
                            .max_by_key(|v| v.get("width").and_then(Value::as_u64).unwrap_or(0));
                        if let Some(u) = best.and_then(|v| str_at(v, "/url")) {
                            return Some(u.to_string());
                        }
                    }
                    _ => {}
                }
            }
            map.values().find_map(|v| find_video_url_at(v, depth + 1))
        }
        Value::Array(items) => items.iter().find_map(|v| find_video_url_at(v, depth + 1)),
        _ => None,
    }
}

/// Instagram page state blobs, searched for a video file URL.
pub fn instagram_state(html: &str) -> Option<String> {
    for re in INSTAGRAM_STATE.iter() {
        for caps in re.captures_iter(html) {
            let Some(m) = caps.get(1) else { continue };
            if let Ok(data) = serde_json::from_str::<Value>(m.as_str()) {
                if let Some(u) = find_video_url(&data) {
                    return Some(u);
                }
            }
        }
    }
    script_bodies(html, &JSON_SCRIPT)
        .iter()
        .filter_map(|body| parse_lenient(body))
        .find_map(|data| find_video_url(&data))
}

pub fn og_url(html: &str) -> Option<String> {
    meta_content(html, &OG_URL)
}

pub fn og_video(html: &str) -> Option<String> {
    meta_content(html, &OG_VIDEO)
}

/// Last resort for TikTok: a numeric item id plus the first owner handle in
/// the page, or an inline `/@user/video/<id>` path.
pub fn id_handle_scan(html: &str) -> Option<String> {
    if let Some(id) = ITEM_ID.captures(html).and_then(|c| c.get(1)) {
        let handle = UNIQUE_ID
            .captures(html)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str());
        return Some(tiktok_url(handle, id.as_str()));
    }
    let caps = USER_VIDEO_PATH.captures(html)?;
    Some(tiktok_url(
        caps.get(1).map(|m| m.as_str()),
        caps.get(2)?.as_str(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ld_json_prefers_content_url() {
        let html = r#"<html><head>
            <script type="application/ld+json">{"@type":"VideoObject","contentUrl":"https://cdn.example.com/v.mp4","url":"https://example.com/x"}</script>
        </head></html>"#;
        assert_eq!(ld_json(html).as_deref(), Some("https://cdn.example.com/v.mp4"));
    }

    #[test]
    fn ld_json_accepts_video_page_url_in_list() {
        let html = r#"<script type="application/ld+json">[{"@type":"Person","url":"https://www.tiktok.com/@u"},{"url":"https://www.tiktok.com/@u/video/7301234567890"}]</script>"#;
        assert_eq!(
            ld_json(html).as_deref(),
            Some("https://www.tiktok.com/@u/video/7301234567890")
        );
    }

    #[test]
    fn ld_json_skips_broken_blocks() {
        let html = r#"<script type="application/ld+json">{ not json</script>
            <script type="application/ld+json">{"contentUrl":"https://cdn.example.com/ok.mp4"}</script>"#;
        assert_eq!(ld_json(html).as_deref(), Some("https://cdn.example.com/ok.mp4"));
    }

    #[test]
    fn sigi_state_builds_canonical_url() {
        let html = r#"<script id="SIGI_STATE" type="application/json">{"ItemModule":{"7301234567890":{"id":"7301234567890","author":"someone"}}}</script>"#;
        assert_eq!(
            tiktok_state(html).as_deref(),
            Some("https://www.tiktok.com/@someone/video/7301234567890")
        );
    }

    #[test]
    fn sigi_state_with_author_object() {
        let html = r#"<script id="SIGI_STATE">window.SIGI_STATE = {"ItemModule":{"42":{"author":{"uniqueId":"handle"}}}};</script>"#;
        assert_eq!(
            tiktok_state(html).as_deref(),
            Some("https://www.tiktok.com/@handle/video/42")
        );
    }

    #[test]
    fn universal_data_fallback() {
        let html = r#"<script id="__UNIVERSAL_DATA_FOR_REHYDRATION__" type="application/json">{"__DEFAULT_SCOPE__":{"webapp.video-detail":{"itemInfo":{"itemStruct":{"id":"7300000000001","author":{"uniqueId":"abc"}}}}}}</script>"#;
        assert_eq!(
            tiktok_state(html).as_deref(),
            Some("https://www.tiktok.com/@abc/video/7300000000001")
        );
    }

    #[test]
    fn reddit_state_reads_post_media() {
        let html = r#"<script>window.___r = {"props":{"pageProps":{"postInfo":{"post":{"media":{"type":"video","content":{"url":"https://v.redd.it/abc123"}}}}}}};</script>"#;
        assert_eq!(reddit_state(html).as_deref(), Some("https://v.redd.it/abc123"));
    }

    #[test]
    fn reddit_state_reads_crosspost() {
        let html = r#"<script>window.___r = {"props":{"pageProps":{"postInfo":{"post":{"media":null,"crosspost_parent_list":[{"secure_media":{"reddit_video":{"fallback_url":"https://v.redd.it/xyz/DASH_720.mp4"}}}]}}}}};</script>"#;
        assert_eq!(
            reddit_state(html).as_deref(),
            Some("https://v.redd.it/xyz/DASH_720.mp4")
        );
    }

    #[test]
    fn find_video_url_picks_widest_version() {
        let data: Value = serde_json::from_str(
            r#"{"items":[{"video_versions":[{"width":480,"url":"https://cdn/480.mp4"},{"width":1080,"url":"https://cdn/1080.mp4"}]}]}"#,
        )
        .unwrap();
        assert_eq!(find_video_url(&data).as_deref(), Some("https://cdn/1080.mp4"));
    }

    #[test]
    fn find_video_url_ignores_non_video_urls() {
        let data: Value = serde_json::from_str(
            r#"{"url":"https://instagram.com/p/x","node":{"display_url":"https://cdn/a.jpg","video_url":"https://cdn/b.mp4?x=1"}}"#,
        )
        .unwrap();
        assert_eq!(find_video_url(&data).as_deref(), Some("https://cdn/b.mp4?x=1"));
    }

    #[test]
    fn find_video_url_respects_depth_limit() {
        let mut nested = serde_json::json!({"video_url": "https://cdn/deep.mp4"});
        for _ in 0..15 {
            nested = serde_json::json!({ "n": nested });
        }
        assert_eq!(find_video_url(&nested), None);
    }

    #[test]
    fn instagram_shared_data() {
        let html = r#"<script>window._sharedData = {"entry_data":{"PostPage":[{"graphql":{"shortcode_media":{"video_url":"https://scontent.cdninstagram.com/v.mp4"}}}]}};</script>"#;
        assert_eq!(
            instagram_state(html).as_deref(),
            Some("https://scontent.cdninstagram.com/v.mp4")
        );
    }

    #[test]
    fn og_tags() {
        let html = r#"<meta property="og:url" content="https://www.tiktok.com/@u/video/123456789">
            <meta property="og:video" content="https://cdn.example.com/og.mp4">"#;
        assert_eq!(og_url(html).as_deref(), Some("https://www.tiktok.com/@u/video/123456789"));
        assert_eq!(og_video(html).as_deref(), Some("https://cdn.example.com/og.mp4"));
    }

    #[test]
    fn id_handle_scan_variants() {
        assert_eq!(
            id_handle_scan(r#"{"itemId":"7301234567890","uniqueId":"someone"}"#).as_deref(),
            Some("https://www.tiktok.com/@someone/video/7301234567890")
        );
        assert_eq!(
            id_handle_scan("itemId=7301234567890").as_deref(),
            Some("https://www.tiktok.com/video/7301234567890")
        );
        assert_eq!(
            id_handle_scan(r#"<a href="/@who/video/7301234567890">"#).as_deref(),
            Some("https://www.tiktok.com/@who/video/7301234567890")
        );
        assert_eq!(id_handle_scan("nothing here"), None);
    }
}
