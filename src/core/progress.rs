use std::time::{Duration, Instant};

use linkgrab_core::models::media::ProgressEvent;

const BAR_SEGMENTS: usize = 20;

pub struct ProgressThrottle {
    last_emit: Option<Instant>,
    min_interval: Duration,
}

impl ProgressThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_emit: None,
            min_interval,
        }
    }

    /// A throttle that counts its creation as the last emit, for when a
    /// status has just been sent through another path.
    pub fn just_emitted(min_interval: Duration) -> Self {
        Self {
            last_emit: Some(Instant::now()),
            min_interval,
        }
    }

    pub fn should_emit(&mut self) -> bool {
        let now = Instant::now();
        match self.last_emit {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub percent: Option<f64>,
    pub speed_bytes_per_sec: f64,
    pub eta: Option<Duration>,
}

/// Folds raw backend events into percent, smoothed speed and ETA.
pub struct ProgressTracker {
    started: Instant,
    last_bytes: u64,
    last_time: Instant,
    speed: f64,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last_bytes: 0,
            last_time: now,
            speed: 0.0,
        }
    }

    pub fn observe(&mut self, event: &ProgressEvent) -> ProgressSnapshot {
        self.observe_at(event, Instant::now())
    }

    fn observe_at(&mut self, event: &ProgressEvent, now: Instant) -> ProgressSnapshot {
        let downloaded = event.downloaded_bytes;

        let instant_speed = match event.speed_bytes_per_sec {
            Some(s) if s.is_finite() && s > 0.0 => Some(s),
            _ => {
                let dt = now.duration_since(self.last_time).as_secs_f64();
                if downloaded > self.last_bytes && dt > 0.1 {
                    Some((downloaded - self.last_bytes) as f64 / dt)
                } else {
                    None
                }
            }
        };
        if let Some(instant) = instant_speed {
            self.speed = if self.speed > 0.0 {
                self.speed * 0.7 + instant * 0.3
            } else {
                instant
            };
        }
        if downloaded >= self.last_bytes {
            self.last_bytes = downloaded;
            self.last_time = now;
        }

        let total = event.total_bytes.filter(|t| *t > 0);
        let percent = total.map(|t| (downloaded as f64 / t as f64 * 100.0).clamp(0.0, 100.0));

        let eta = match (total, percent) {
            (Some(t), _) if self.speed > 0.0 => {
                let remaining = t.saturating_sub(downloaded) as f64 / self.speed;
                Some(Duration::from_secs_f64(remaining))
            }
            (_, Some(p)) if p > 0.0 => {
                let elapsed = now.duration_since(self.started).as_secs_f64();
                let remaining = elapsed * (100.0 - p) / p;
                if elapsed > 2.0 && remaining.is_finite() && remaining >= 0.0 {
                    Some(Duration::from_secs_f64(remaining))
                } else {
                    None
                }
            }
            _ => None,
        };

        ProgressSnapshot {
            downloaded_bytes: downloaded,
            total_bytes: total,
            percent,
            speed_bytes_per_sec: self.speed,
            eta,
        }
    }
}

pub fn render_bar(percent: f64) -> String {
    let filled = ((percent.clamp(0.0, 100.0) / 100.0) * BAR_SEGMENTS as f64).floor() as usize;
    let filled = filled.min(BAR_SEGMENTS);
    format!("{}{}", "▰".repeat(filled), "▱".repeat(BAR_SEGMENTS - filled))
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

pub fn format_eta(eta: Duration) -> String {
    let secs = eta.as_secs();
    let (mins, secs) = (secs / 60, secs % 60);
    if mins >= 60 {
        format!("{}h {}m", mins / 60, mins % 60)
    } else {
        format!("{}m {}s", mins, secs)
    }
}

/// Status text for an in-flight transfer.
pub fn render_status(label: &str, snap: &ProgressSnapshot) -> String {
    let mut out = format!("⏳ Downloading from {}\n", label);
    match (snap.percent, snap.total_bytes) {
        (Some(p), Some(total)) => {
            out.push_str(&format!("{} {:.1}%\n", render_bar(p), p));
            out.push_str(&format!(
                "{} of {}\n",
                format_bytes(snap.downloaded_bytes),
                format_bytes(total)
            ));
        }
        _ => out.push_str(&format!("📥 {} downloaded\n", format_bytes(snap.downloaded_bytes))),
    }
    if snap.speed_bytes_per_sec > 0.0 {
        out.push_str(&format!("Speed: {}/s", format_bytes(snap.speed_bytes_per_sec as u64)));
    } else {
        out.push_str("Speed: n/a");
    }
    match snap.eta {
        Some(eta) => out.push_str(&format!(" | Remaining: {}", format_eta(eta))),
        None => out.push_str(" | Remaining: n/a"),
    }
    out
}
