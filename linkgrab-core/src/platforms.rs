use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    TikTok,
    Instagram,
    Facebook,
    Twitter,
    Vk,
    Reddit,
    Pinterest,
    Dailymotion,
    Vimeo,
    SoundCloud,
    YouTube,
    DirectFile,
}

impl Platform {
    pub const ALL: [Platform; 12] = [
        Platform::TikTok,
        Platform::Instagram,
        Platform::Facebook,
        Platform::Twitter,
        Platform::Vk,
        Platform::Reddit,
        Platform::Pinterest,
        Platform::Dailymotion,
        Platform::Vimeo,
        Platform::SoundCloud,
        Platform::YouTube,
        Platform::DirectFile,
    ];

    /// Detects the hosting platform from the URL host. Direct files are not
    /// host-based and are never returned here.
    pub fn from_url(url: &str) -> Option<Self> {
        let parsed = url::Url::parse(url).ok()?;
        let host = parsed.host_str()?.to_lowercase();
        Self::from_host(&host)
    }

    pub fn from_host(host: &str) -> Option<Self> {
        let host = host.trim_start_matches("www.");
        Platform::ALL
            .iter()
            .copied()
            .find(|p| p.hosts().iter().any(|h| host == *h || host.ends_with(&format!(".{}", h))))
    }

    pub fn hosts(&self) -> &'static [&'static str] {
        match self {
            Platform::TikTok => &["tiktok.com"],
            Platform::Instagram => &["instagram.com", "instagr.am"],
            Platform::Facebook => &["facebook.com", "fb.watch"],
            Platform::Twitter => &["twitter.com", "x.com"],
            Platform::Vk => &["vk.com", "vkvideo.ru"],
            Platform::Reddit => &["reddit.com", "redd.it"],
            Platform::Pinterest => &[
                "pinterest.com",
                "pinterest.ru",
                "pinterest.ca",
                "pinterest.de",
                "pinterest.fr",
                "pinterest.jp",
                "pinterest.co.uk",
                "pinterest.it",
                "pinterest.es",
                "pinterest.nl",
                "pinterest.se",
                "pinterest.pl",
                "pinterest.com.br",
                "pinterest.com.mx",
                "pin.it",
            ],
            Platform::Dailymotion => &["dailymotion.com", "dai.ly"],
            Platform::Vimeo => &["vimeo.com"],
            Platform::SoundCloud => &["soundcloud.com"],
            Platform::YouTube => &["youtube.com", "youtu.be"],
            Platform::DirectFile => &[],
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Platform::TikTok => "tiktok",
            Platform::Instagram => "instagram",
            Platform::Facebook => "facebook",
            Platform::Twitter => "twitter",
            Platform::Vk => "vk",
            Platform::Reddit => "reddit",
            Platform::Pinterest => "pinterest",
            Platform::Dailymotion => "dailymotion",
            Platform::Vimeo => "vimeo",
            Platform::SoundCloud => "soundcloud",
            Platform::YouTube => "youtube",
            Platform::DirectFile => "direct",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Platform::TikTok => "TikTok",
            Platform::Instagram => "Instagram",
            Platform::Facebook => "Facebook",
            Platform::Twitter => "Twitter/X",
            Platform::Vk => "VK",
            Platform::Reddit => "Reddit",
            Platform::Pinterest => "Pinterest",
            Platform::Dailymotion => "Dailymotion",
            Platform::Vimeo => "Vimeo",
            Platform::SoundCloud => "SoundCloud",
            Platform::YouTube => "YouTube",
            Platform::DirectFile => "Direct link",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
