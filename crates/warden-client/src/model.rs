//! Wire DTOs for the remote engine's JSON responses, and the public
//! [`TorrentFile`] type exposed to callers.

use serde::Deserialize;
use warden_core::{Torrent, TorrentState};

/// One file within a torrent's payload, as reported by the remote
/// engine's files listing (§4.2).
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentFile {
    /// Zero-based index used to address this file in priority updates.
    pub index: u32,
    /// Path relative to the torrent's content root.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Current download priority; `0` means "do not download".
    pub priority: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireTorrent {
    pub hash: String,
    pub name: String,
    pub progress: f64,
    pub state: String,
    #[serde(default)]
    pub tags: String,
    pub category: Option<String>,
    pub save_path: String,
    pub content_path: Option<String>,
    pub size: u64,
}

impl From<WireTorrent> for Torrent {
    fn from(wire: WireTorrent) -> Self {
        let tags = wire
            .tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();

        Self {
            hash: wire.hash,
            name: wire.name,
            progress: wire.progress,
            state: parse_state(&wire.state),
            tags,
            category: wire.category.filter(|c| !c.is_empty()),
            save_path: wire.save_path,
            content_path: wire.content_path.filter(|p| !p.is_empty()),
            size: wire.size,
        }
    }
}

fn parse_state(raw: &str) -> TorrentState {
    match raw {
        "stalledDL" => TorrentState::StalledDl,
        "metaDL" => TorrentState::MetaDl,
        "queuedDL" => TorrentState::QueuedDl,
        "forcedMetaDL" => TorrentState::ForcedMetaDl,
        "downloading" => TorrentState::Downloading,
        _ => TorrentState::Other,
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireFile {
    pub index: u32,
    pub name: String,
    pub size: u64,
    pub priority: u32,
}

impl From<WireFile> for TorrentFile {
    fn from(wire: WireFile) -> Self {
        Self {
            index: wire.index,
            name: wire.name,
            size: wire.size,
            priority: wire.priority,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_tags_split_on_comma_and_trim_whitespace() {
        let wire = WireTorrent {
            hash: "a".repeat(40),
            name: "Movie".to_string(),
            progress: 1.0,
            state: "stalledDL".to_string(),
            tags: "added, processing".to_string(),
            category: Some(String::new()),
            save_path: "/data".to_string(),
            content_path: None,
            size: 10,
        };
        let torrent: Torrent = wire.into();
        assert_eq!(torrent.tags, vec!["added", "processing"]);
        assert_eq!(torrent.state, TorrentState::StalledDl);
        assert_eq!(torrent.category, None);
    }
}
