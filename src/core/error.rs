use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// A status code only counts when it is labelled as one ("HTTP Error 429",
/// "status code: 404"); bare digits also occur inside media ids.
static STATUS_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:http(?:\s+error)?|status(?:\s+code)?)\s*[:=]?\s*(\d{3})\b")
        .expect("valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnsupportedLink,
    NetworkFailure,
    RateLimited,
    NotFound,
    NoMediaInResource,
    FileTooLarge,
    DiskExhausted,
    Timeout,
    Internal,
}

impl ErrorKind {
    pub fn id(&self) -> &'static str {
        match self {
            ErrorKind::UnsupportedLink => "unsupported_link",
            ErrorKind::NetworkFailure => "network_failure",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::NotFound => "not_found",
            ErrorKind::NoMediaInResource => "no_media_in_resource",
            ErrorKind::FileTooLarge => "file_too_large",
            ErrorKind::DiskExhausted => "disk_exhausted",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::NetworkFailure | ErrorKind::RateLimited | ErrorKind::NotFound
        )
    }

    /// Classifies free-form failure text from a backend (yt-dlp stderr, HTTP
    /// errors, IO errors). Order matters: the more specific markers are tested
    /// before generic ones such as "network".
    pub fn classify(message: &str) -> ErrorKind {
        let msg = message.to_lowercase();

        if msg.contains("unsupported url") || msg.contains("unsupported link") {
            return ErrorKind::UnsupportedLink;
        }
        if msg.contains("no space left") || msg.contains("disk full") || msg.contains("os error 28") {
            return ErrorKind::DiskExhausted;
        }
        if msg.contains("file too large")
            || msg.contains("exceeds file size limit")
            || msg.contains("max-filesize")
        {
            return ErrorKind::FileTooLarge;
        }
        if msg.contains("no video could be found")
            || msg.contains("no video formats found")
            || msg.contains("no media found")
            || msg.contains("there's no video in this")
        {
            return ErrorKind::NoMediaInResource;
        }
        if let Some(kind) = STATUS_CODE_RE
            .captures(&msg)
            .and_then(|c| c[1].parse::<u16>().ok())
            .map(ErrorKind::from_http_status)
            .filter(|k| *k != ErrorKind::Internal)
        {
            return kind;
        }
        if msg.contains("rate limit") || msg.contains("too many requests") {
            return ErrorKind::RateLimited;
        }
        if msg.contains("timed out") || msg.contains("timeout") {
            return ErrorKind::Timeout;
        }
        if msg.contains("network")
            || msg.contains("connection")
            || msg.contains("dns error")
            || msg.contains("error sending request")
        {
            return ErrorKind::NetworkFailure;
        }
        if msg.contains("not found")
            || msg.contains("unable to download")
            || msg.contains("video unavailable")
            || msg.contains("has been removed")
        {
            return ErrorKind::NotFound;
        }
        ErrorKind::Internal
    }

    pub fn from_http_status(status: u16) -> ErrorKind {
        match status {
            429 => ErrorKind::RateLimited,
            404 | 410 => ErrorKind::NotFound,
            413 => ErrorKind::FileTooLarge,
            408 | 504 => ErrorKind::Timeout,
            500..=599 => ErrorKind::NetworkFailure,
            _ => ErrorKind::Internal,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ErrorKind::UnsupportedLink => "🔗 Unsupported link",
            ErrorKind::NetworkFailure => "🌐 Network issues",
            ErrorKind::RateLimited => "⏱️ Too many requests",
            ErrorKind::NotFound => "❌ Media not found",
            ErrorKind::NoMediaInResource => "🖼️ No video in post",
            ErrorKind::FileTooLarge => "💾 File too large",
            ErrorKind::DiskExhausted => "⚠️ Not enough disk space",
            ErrorKind::Timeout => "⌛ Download timed out",
            ErrorKind::Internal => "⚙️ Internal error",
        }
    }

    pub fn hint(&self) -> &'static str {
        match self {
            ErrorKind::UnsupportedLink => {
                "Send a direct link to a video (not a profile or hashtag) on a supported platform."
            }
            ErrorKind::NetworkFailure => {
                "The source did not respond properly. These errors are usually temporary, try again in a few minutes."
            }
            ErrorKind::RateLimited => "The source is throttling requests. Wait about 5 minutes before retrying.",
            ErrorKind::NotFound => {
                "The media may have been deleted, the link may be wrong, or it is unavailable in this region."
            }
            ErrorKind::NoMediaInResource => {
                "This post only contains text, images or GIFs. Try a post with a video."
            }
            ErrorKind::FileTooLarge => "The file exceeds the size limit. Try the audio version instead.",
            ErrorKind::DiskExhausted => "The server is low on disk space. Try again later.",
            ErrorKind::Timeout => "The download took too long and was stopped. Try a shorter video.",
            ErrorKind::Internal => "An unexpected error occurred. Please try again later.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: ErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Wraps unstructured text, deriving the kind from its content.
    pub fn classified(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: ErrorKind::classify(&message),
            message,
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnsupportedLink, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn http_status(status: reqwest::StatusCode, url: &str) -> Self {
        Self::new(
            ErrorKind::from_http_status(status.as_u16()),
            format!("HTTP {} for {}", status.as_u16(), url),
        )
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            ErrorKind::Timeout
        } else if let Some(status) = e.status() {
            ErrorKind::from_http_status(status.as_u16())
        } else if e.is_connect() || e.is_request() || e.is_body() {
            ErrorKind::NetworkFailure
        } else {
            ErrorKind::classify(&e.to_string())
        };
        Self::new(kind, e.to_string())
    }
}

impl From<std::io::Error> for FetchError {
    fn from(e: std::io::Error) -> Self {
        let kind = if e.kind() == std::io::ErrorKind::StorageFull {
            ErrorKind::DiskExhausted
        } else {
            ErrorKind::classify(&e.to_string())
        };
        Self::new(kind, e.to_string())
    }
}

impl From<sqlx::Error> for FetchError {
    fn from(e: sqlx::Error) -> Self {
        Self::internal(format!("cache index: {}", e))
    }
}

pub type FetchResult<T> = Result<T, FetchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_backend_text() {
        assert_eq!(
            ErrorKind::classify("ERROR: Unsupported URL: https://example.com"),
            ErrorKind::UnsupportedLink
        );
        assert_eq!(
            ErrorKind::classify("HTTP Error 429: Too Many Requests"),
            ErrorKind::RateLimited
        );
        assert_eq!(
            ErrorKind::classify("ERROR: [twitter] 123: No video could be found in this tweet"),
            ErrorKind::NoMediaInResource
        );
        assert_eq!(
            ErrorKind::classify("HTTP Error 404: Not Found"),
            ErrorKind::NotFound
        );
        assert_eq!(
            ErrorKind::classify("Connection reset by peer"),
            ErrorKind::NetworkFailure
        );
        assert_eq!(ErrorKind::classify("read timed out"), ErrorKind::Timeout);
        assert_eq!(
            ErrorKind::classify("No space left on device (os error 28)"),
            ErrorKind::DiskExhausted
        );
        assert_eq!(ErrorKind::classify("something odd"), ErrorKind::Internal);
    }

    #[test]
    fn digits_inside_ids_are_not_status_codes() {
        assert_eq!(
            ErrorKind::classify(
                "ERROR: [twitter] 1790000429000000000: No video could be found in this tweet"
            ),
            ErrorKind::NoMediaInResource
        );
        assert_eq!(
            ErrorKind::classify("ERROR: [vk] -41041004_456239404: Unable to extract info"),
            ErrorKind::Internal
        );
        assert_eq!(
            ErrorKind::classify("ERROR: [youtube] abc: unable to download webpage: HTTP Error 410: Gone"),
            ErrorKind::NotFound
        );
        assert_eq!(
            ErrorKind::classify("request failed with status code: 429"),
            ErrorKind::RateLimited
        );
        assert_eq!(
            ErrorKind::classify("HTTP 404 for https://cdn.example.com/429.mp4"),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn maps_http_status() {
        assert_eq!(ErrorKind::from_http_status(429), ErrorKind::RateLimited);
        assert_eq!(ErrorKind::from_http_status(404), ErrorKind::NotFound);
        assert_eq!(ErrorKind::from_http_status(410), ErrorKind::NotFound);
        assert_eq!(ErrorKind::from_http_status(502), ErrorKind::NetworkFailure);
        assert_eq!(ErrorKind::from_http_status(403), ErrorKind::Internal);
    }

    #[test]
    fn retryable_kinds() {
        assert!(ErrorKind::NetworkFailure.is_retryable());
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(ErrorKind::NotFound.is_retryable());
        assert!(!ErrorKind::Timeout.is_retryable());
        assert!(!ErrorKind::UnsupportedLink.is_retryable());
        assert!(!ErrorKind::FileTooLarge.is_retryable());
    }

    #[test]
    fn classified_error_keeps_message() {
        let e = FetchError::classified("HTTP Error 503: Service Unavailable network");
        assert_eq!(e.kind, ErrorKind::NetworkFailure);
        assert!(e.to_string().starts_with("network_failure: "));
    }
}
