use std::sync::Arc;

use crate::core::http_client::{ClientProfile, HttpClients};
use crate::platforms::direct::DirectFileBackend;
use crate::platforms::generic_ytdlp::GenericYtdlpBackend;
use crate::platforms::instagram::InstagramBackend;
use crate::platforms::traits::ExtractorBackend;

/// Backends in priority order; the first one that accepts a URL wins.
pub struct BackendRegistry {
    backends: Vec<Arc<dyn ExtractorBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
        }
    }

    /// Direct files, then bespoke platform backends, then yt-dlp for
    /// everything else.
    pub fn with_defaults(clients: &HttpClients) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DirectFileBackend::new(
            clients.for_profile(ClientProfile::Desktop).clone(),
        )));
        registry.register(Arc::new(InstagramBackend::new(
            clients.for_profile(ClientProfile::Mobile).clone(),
        )));
        registry.register(Arc::new(GenericYtdlpBackend::new()));
        registry
    }

    pub fn register(&mut self, backend: Arc<dyn ExtractorBackend>) {
        self.backends.push(backend);
    }

    pub fn find_backend(&self, url: &str) -> Option<Arc<dyn ExtractorBackend>> {
        self.backends.iter().find(|b| b.can_handle(url)).cloned()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> BackendRegistry {
        BackendRegistry::with_defaults(&HttpClients::new().unwrap())
    }

    #[test]
    fn direct_files_win_over_platforms() {
        let r = registry();
        let b = r.find_backend("https://cdn.example.com/media/clip.mp4").unwrap();
        assert_eq!(b.name(), "direct");
    }

    #[test]
    fn instagram_posts_use_bespoke_backend() {
        let r = registry();
        let b = r.find_backend("https://www.instagram.com/reel/Cx1AbC/").unwrap();
        assert_eq!(b.name(), "instagram");
    }

    #[test]
    fn everything_else_falls_back_to_ytdlp() {
        let r = registry();
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://www.tiktok.com/@user/video/7234567890123456789",
            "https://vimeo.com/123456",
        ] {
            assert_eq!(r.find_backend(url).unwrap().name(), "yt-dlp", "{}", url);
        }
    }

    #[test]
    fn non_http_is_unhandled() {
        assert!(registry().find_backend("ftp://example.com/a.mp4").is_none());
        assert!(BackendRegistry::new().is_empty());
    }
}
