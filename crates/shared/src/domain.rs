use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(WorkspaceId);
id_newtype!(PostId);
id_newtype!(VideoJobId);

/// An external social network integration target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Twitter,
    Linkedin,
    Facebook,
    Instagram,
    Tiktok,
    Youtube,
}

impl Platform {
    pub const ALL: [Platform; 6] = [
        Platform::Twitter,
        Platform::Linkedin,
        Platform::Facebook,
        Platform::Instagram,
        Platform::Tiktok,
        Platform::Youtube,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Twitter => "twitter",
            Platform::Linkedin => "linkedin",
            Platform::Facebook => "facebook",
            Platform::Instagram => "instagram",
            Platform::Tiktok => "tiktok",
            Platform::Youtube => "youtube",
        }
    }

    /// Budget for a full authorization round-trip. Facebook and Instagram
    /// include a page-selection step and get the longest window.
    pub fn connect_timeout(self) -> Duration {
        match self {
            Platform::Twitter => Duration::from_secs(45),
            Platform::Linkedin => Duration::from_secs(60),
            Platform::Facebook => Duration::from_secs(90),
            Platform::Instagram => Duration::from_secs(90),
            Platform::Tiktok => Duration::from_secs(60),
            Platform::Youtube => Duration::from_secs(60),
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Platform::Twitter => "Twitter",
            Platform::Linkedin => "LinkedIn",
            Platform::Facebook => "Facebook",
            Platform::Instagram => "Instagram",
            Platform::Tiktok => "TikTok",
            Platform::Youtube => "YouTube",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown platform '{0}'")]
pub struct UnknownPlatform(pub String);

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        Platform::ALL
            .into_iter()
            .find(|platform| platform.as_str() == normalized)
            .ok_or_else(|| UnknownPlatform(raw.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostState {
    Scheduled,
    Published,
    Failed,
}

impl PostState {
    pub fn as_str(self) -> &'static str {
        match self {
            PostState::Scheduled => "scheduled",
            PostState::Published => "published",
            PostState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoJobState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl VideoJobState {
    pub fn as_str(self) -> &'static str {
        match self {
            VideoJobState::Pending => "pending",
            VideoJobState::Processing => "processing",
            VideoJobState::Completed => "completed",
            VideoJobState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, VideoJobState::Completed | VideoJobState::Failed)
    }
}

impl FromStr for VideoJobState {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(VideoJobState::Pending),
            "processing" => Ok(VideoJobState::Processing),
            "completed" => Ok(VideoJobState::Completed),
            "failed" => Ok(VideoJobState::Failed),
            other => Err(format!("unknown video job state '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_parses_case_insensitively() {
        assert_eq!("LinkedIn".parse::<Platform>(), Ok(Platform::Linkedin));
        assert_eq!(" youtube ".parse::<Platform>(), Ok(Platform::Youtube));
        assert!("myspace".parse::<Platform>().is_err());
    }

    #[test]
    fn connect_timeouts_match_platform_table() {
        let secs: Vec<u64> = Platform::ALL
            .iter()
            .map(|p| p.connect_timeout().as_secs())
            .collect();
        assert_eq!(secs, vec![45, 60, 90, 90, 60, 60]);
    }

    #[test]
    fn platform_serializes_as_snake_case() {
        let json = serde_json::to_string(&Platform::Tiktok).expect("json");
        assert_eq!(json, "\"tiktok\"");
    }
}
