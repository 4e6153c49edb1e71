use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Log {
    #[serde(default)]
    pub to: To,
    #[serde(default)]
    pub level: Level,
    #[serde(default = "Log::dir_default")]
    pub dir: String,
    #[serde(default = "Log::file_default")]
    pub file: String,
}

impl Default for Log {
    fn default() -> Self {
        Self { to: To::default(), level: Level::default(), dir: Self::dir_default(), file: Self::file_default() }
    }
}

impl Log {
    fn dir_default() -> String {
        "/var/log/vbridge".into()
    }

    fn file_default() -> String {
        "vbridge.log".into()
    }

    /// Log file location, `None` without a file name. A relative `dir` is kept relative.
    pub fn path(&self) -> Option<PathBuf> {
        if self.file.trim().is_empty() {
            return None;
        }
        Some(PathBuf::from(&self.dir).join(&self.file))
    }
}

/// Where log records go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum To {
    Off,
    File,
    #[default]
    Console,
    Both,
}

impl To {
    #[inline]
    pub fn file(&self) -> bool {
        matches!(self, To::Both | To::File)
    }

    #[inline]
    pub fn console(&self) -> bool {
        matches!(self, To::Both | To::Console)
    }
}

/// Minimum severity, parsed with slog's names ("trace" ... "critical").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct Level(slog::Level);

impl Default for Level {
    fn default() -> Self {
        Level(slog::Level::Info)
    }
}

impl Level {
    #[inline]
    pub fn inner(&self) -> slog::Level {
        self.0
    }
}

impl TryFrom<String> for Level {
    type Error = String;

    fn try_from(level: String) -> Result<Self, Self::Error> {
        slog::Level::from_str(level.trim()).map(Level).map_err(|_| format!("bad log level '{level}'"))
    }
}
