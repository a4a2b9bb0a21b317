use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// Wire records. Every field is optional: a missing id is a per-row
// condition handled during normalization, never a decode failure.

#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone, Default)]
pub struct ExternalUrls {
    pub spotify: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone, Default)]
pub struct Artist {
    pub id: Option<String>,
    pub name: Option<String>,
    pub external_urls: Option<ExternalUrls>,
}

#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone, Default)]
pub struct Album {
    pub id: Option<String>,
    pub name: Option<String>,
    pub release_date: Option<String>,
    pub total_tracks: Option<u32>,
    /// single, album or compilation
    pub album_type: Option<String>,
    pub label: Option<String>,
    pub external_urls: Option<ExternalUrls>,
}

#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone, Default)]
pub struct Track {
    pub id: Option<String>,
    pub name: Option<String>,
    pub duration_ms: Option<u64>,
    pub popularity: Option<u32>,
    pub explicit: Option<bool>,
    pub external_urls: Option<ExternalUrls>,
    pub album: Option<Album>,
    /// May be absent or null on the wire.
    pub artists: Option<Vec<Artist>>,
}

impl Track {
    pub fn artists(&self) -> &[Artist] {
        self.artists.as_deref().unwrap_or_default()
    }
}

/// One playlist slot. The same track may occupy several slots.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone, Default)]
pub struct TrackMembership {
    pub added_at: Option<String>,
    pub track: Option<Track>,
}

#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone, Default)]
pub struct Owner {
    pub id: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone, Default)]
pub struct Followers {
    pub total: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone, Default)]
pub struct PlaylistInfo {
    pub name: Option<String>,
    pub description: Option<String>,
    pub owner: Option<Owner>,
    pub public: Option<bool>,
    pub followers: Option<Followers>,
}

/// One page of `GET /playlists/{id}/tracks`.
#[derive(Debug, Deserialize, Clone)]
pub struct TracksPage {
    pub items: Vec<TrackMembership>,
    pub next: Option<String>,
    pub total: Option<u64>,
}

/// Everything pulled for one playlist in one extraction run.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct RawExtraction {
    pub playlist_id: String,
    #[serde(default)]
    pub playlist_info: PlaylistInfo,
    pub tracks: Vec<TrackMembership>,
    #[serde(default)]
    pub total_tracks: usize,
    pub extracted_at: Option<String>,
    /// Older objects carry their stamp under this name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_timestamp: Option<String>,
}

impl RawExtraction {
    /// The extraction stamp, preferring `extracted_at` over the legacy field.
    pub fn stamp(&self) -> Option<&str> {
        self.extracted_at
            .as_deref()
            .or(self.extraction_timestamp.as_deref())
            .filter(|stamp| !stamp.trim().is_empty())
    }
}

// Normalized rows. Field order is the export column order.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumRow {
    pub album_id: String,
    pub album_name: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub total_tracks: Option<u32>,
    pub album_url: Option<String>,
    pub album_type: Option<String>,
    pub label: Option<String>,
    pub extracted_at: Option<DateTime<Utc>>,
    pub transformed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtistRow {
    pub artist_id: String,
    pub artist_name: Option<String>,
    pub artist_url: Option<String>,
    pub extracted_at: Option<DateTime<Utc>>,
    pub transformed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongRow {
    pub song_id: String,
    pub song_name: Option<String>,
    pub duration_ms: Option<u64>,
    pub url: Option<String>,
    pub popularity: Option<u32>,
    pub song_added: Option<DateTime<Utc>>,
    pub album_id: Option<String>,
    /// Primary (first listed) artist only.
    pub artist_id: Option<String>,
    pub extracted_at: Option<DateTime<Utc>>,
    pub transformed_at: DateTime<Utc>,
}

pub(crate) fn spotify_url(urls: &Option<ExternalUrls>) -> Option<String> {
    urls.as_ref().and_then(|urls| urls.spotify.clone())
}
