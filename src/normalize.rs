//! Flattens raw playlist extractions into album, artist and song rows.
//!
//! Projections are pure: each walks the membership list once and returns
//! its rows together with the warnings it raised. Rows are then
//! deduplicated by id (first occurrence wins) and every row of one
//! normalization run carries the same `transformed_at`.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, SubsecRound, Utc};
use itertools::Itertools;
use tracing::{info, warn};

use crate::types::{
    spotify_url, AlbumRow, ArtistRow, RawExtraction, SongRow, TrackMembership,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WarningKind {
    /// Membership without a track object. Excluded everywhere.
    MissingTrack,
    /// Track without an id. Excluded from songs.
    MissingTrackId,
    /// Track without an album object. Excluded from albums.
    MissingAlbum,
    /// Album without an id. Excluded from albums, song keeps a null album_id.
    MissingAlbumId,
    /// Track without artists. Song keeps a null artist_id.
    MissingArtists,
    /// Artist without an id. Excluded from artists.
    MissingArtistId,
    MissingTrackUrl,
    MissingAddedAt,
    UnparseableTimestamp,
    /// The extraction carried no stamp and one was made up.
    SynthesizedExtractedAt,
}

impl WarningKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WarningKind::MissingTrack => "missing_track",
            WarningKind::MissingTrackId => "missing_track_id",
            WarningKind::MissingAlbum => "missing_album",
            WarningKind::MissingAlbumId => "missing_album_id",
            WarningKind::MissingArtists => "missing_artists",
            WarningKind::MissingArtistId => "missing_artist_id",
            WarningKind::MissingTrackUrl => "missing_track_url",
            WarningKind::MissingAddedAt => "missing_added_at",
            WarningKind::UnparseableTimestamp => "unparseable_timestamp",
            WarningKind::SynthesizedExtractedAt => "synthesized_extracted_at",
        }
    }
}

/// A non-fatal finding about one playlist slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    pub kind: WarningKind,
    /// Index into the membership list, if the warning concerns one slot.
    pub position: Option<usize>,
    pub detail: Option<String>,
}

impl ValidationWarning {
    fn at(kind: WarningKind, position: usize) -> Self {
        Self {
            kind,
            position: Some(position),
            detail: None,
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DuplicateCounts {
    pub albums: usize,
    pub artists: usize,
    pub songs: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub warnings: Vec<ValidationWarning>,
    pub duplicates_dropped: DuplicateCounts,
}

impl Diagnostics {
    pub fn count(&self, kind: WarningKind) -> usize {
        self.warnings.iter().filter(|w| w.kind == kind).count()
    }

    pub fn extracted_at_synthesized(&self) -> bool {
        self.count(WarningKind::SynthesizedExtractedAt) > 0
    }

    /// Warning counts keyed by kind name.
    pub fn summary(&self) -> BTreeMap<&'static str, usize> {
        self.warnings
            .iter()
            .map(|w| w.kind)
            .counts()
            .into_iter()
            .map(|(kind, n)| (kind.as_str(), n))
            .collect()
    }
}

/// Result of one normalization run over one raw extraction.
#[derive(Debug, Clone)]
pub struct NormalizedBatch {
    pub playlist_id: String,
    pub extracted_at: Option<DateTime<Utc>>,
    pub transformed_at: DateTime<Utc>,
    pub albums: Vec<AlbumRow>,
    pub artists: Vec<ArtistRow>,
    pub songs: Vec<SongRow>,
    pub diagnostics: Diagnostics,
}

/// Hands out `transformed_at` stamps. Stamps are truncated to microseconds
/// and strictly increasing, so separate runs never share one.
#[derive(Debug, Default)]
pub struct RunClock {
    last: Option<DateTime<Utc>>,
}

impl RunClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now().trunc_subsecs(6);
        let stamp = match self.last {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last = Some(stamp);
        stamp
    }
}

pub fn normalize(raw: &RawExtraction, transformed_at: DateTime<Utc>) -> NormalizedBatch {
    let mut diagnostics = Diagnostics::default();
    let extracted_at = resolve_extracted_at(raw, &mut diagnostics.warnings);

    for (position, membership) in raw.tracks.iter().enumerate() {
        if membership.track.is_none() {
            diagnostics
                .warnings
                .push(ValidationWarning::at(WarningKind::MissingTrack, position));
        }
    }

    let stamps = Stamps {
        extracted_at,
        transformed_at,
    };
    let (albums, album_warnings) = project_albums(&raw.tracks, stamps);
    let (artists, artist_warnings) = project_artists(&raw.tracks, stamps);
    let (songs, song_warnings) = project_songs(&raw.tracks, stamps);
    diagnostics.warnings.extend(album_warnings);
    diagnostics.warnings.extend(artist_warnings);
    diagnostics.warnings.extend(song_warnings);

    let (albums, dropped_albums) = dedup_by_id(albums, |row| row.album_id.clone());
    let (artists, dropped_artists) = dedup_by_id(artists, |row| row.artist_id.clone());
    let (songs, dropped_songs) = dedup_by_id(songs, |row| row.song_id.clone());
    diagnostics.duplicates_dropped = DuplicateCounts {
        albums: dropped_albums,
        artists: dropped_artists,
        songs: dropped_songs,
    };

    if !diagnostics.warnings.is_empty() {
        warn!(
            playlist_id = %raw.playlist_id,
            warnings = ?diagnostics.summary(),
            "Rows dropped or incomplete during normalization"
        );
    }
    info!(
        playlist_id = %raw.playlist_id,
        albums = albums.len(),
        artists = artists.len(),
        songs = songs.len(),
        transformed_at = %transformed_at,
        "Normalized extraction"
    );

    NormalizedBatch {
        playlist_id: raw.playlist_id.clone(),
        extracted_at,
        transformed_at,
        albums,
        artists,
        songs,
        diagnostics,
    }
}

#[derive(Debug, Clone, Copy)]
struct Stamps {
    extracted_at: Option<DateTime<Utc>>,
    transformed_at: DateTime<Utc>,
}

fn resolve_extracted_at(
    raw: &RawExtraction,
    warnings: &mut Vec<ValidationWarning>,
) -> Option<DateTime<Utc>> {
    match raw.stamp() {
        Some(stamp) => {
            let parsed = parse_timestamp(stamp);
            if parsed.is_none() {
                warnings.push(ValidationWarning {
                    kind: WarningKind::UnparseableTimestamp,
                    position: None,
                    detail: Some(format!("extracted_at={stamp}")),
                });
            }
            parsed
        }
        None => {
            warn!(playlist_id = %raw.playlist_id, "No extraction stamp, using current time");
            warnings.push(ValidationWarning {
                kind: WarningKind::SynthesizedExtractedAt,
                position: None,
                detail: None,
            });
            Some(Utc::now().trunc_subsecs(6))
        }
    }
}

fn project_albums(
    memberships: &[TrackMembership],
    stamps: Stamps,
) -> (Vec<AlbumRow>, Vec<ValidationWarning>) {
    let mut rows = Vec::new();
    let mut warnings = Vec::new();

    for (position, membership) in memberships.iter().enumerate() {
        let Some(track) = &membership.track else {
            continue;
        };
        let Some(album) = &track.album else {
            warnings.push(ValidationWarning::at(WarningKind::MissingAlbum, position));
            continue;
        };
        let Some(album_id) = non_empty(&album.id) else {
            warnings.push(ValidationWarning::at(WarningKind::MissingAlbumId, position));
            continue;
        };

        let release_date = album.release_date.as_deref().and_then(|raw| {
            let parsed = parse_release_date(raw);
            if parsed.is_none() {
                warnings.push(
                    ValidationWarning::at(WarningKind::UnparseableTimestamp, position)
                        .with_detail(format!("release_date={raw}")),
                );
            }
            parsed
        });

        rows.push(AlbumRow {
            album_id,
            album_name: album.name.clone(),
            release_date,
            total_tracks: album.total_tracks,
            album_url: spotify_url(&album.external_urls),
            album_type: album.album_type.clone(),
            label: album.label.clone(),
            extracted_at: stamps.extracted_at,
            transformed_at: stamps.transformed_at,
        });
    }

    (rows, warnings)
}

fn project_artists(
    memberships: &[TrackMembership],
    stamps: Stamps,
) -> (Vec<ArtistRow>, Vec<ValidationWarning>) {
    let mut rows = Vec::new();
    let mut warnings = Vec::new();

    for (position, membership) in memberships.iter().enumerate() {
        let Some(track) = &membership.track else {
            continue;
        };
        for artist in track.artists() {
            let Some(artist_id) = non_empty(&artist.id) else {
                warnings.push(ValidationWarning::at(WarningKind::MissingArtistId, position));
                continue;
            };
            rows.push(ArtistRow {
                artist_id,
                artist_name: artist.name.clone(),
                artist_url: spotify_url(&artist.external_urls),
                extracted_at: stamps.extracted_at,
                transformed_at: stamps.transformed_at,
            });
        }
    }

    (rows, warnings)
}

fn project_songs(
    memberships: &[TrackMembership],
    stamps: Stamps,
) -> (Vec<SongRow>, Vec<ValidationWarning>) {
    let mut rows = Vec::new();
    let mut warnings = Vec::new();

    for (position, membership) in memberships.iter().enumerate() {
        let Some(track) = &membership.track else {
            continue;
        };
        let Some(song_id) = non_empty(&track.id) else {
            warnings.push(ValidationWarning::at(WarningKind::MissingTrackId, position));
            continue;
        };

        let url = spotify_url(&track.external_urls);
        if url.is_none() {
            warnings.push(ValidationWarning::at(WarningKind::MissingTrackUrl, position));
        }
        let song_added = match membership.added_at.as_deref() {
            None => {
                warnings.push(ValidationWarning::at(WarningKind::MissingAddedAt, position));
                None
            }
            Some(raw) => {
                let parsed = parse_timestamp(raw);
                if parsed.is_none() {
                    warnings.push(
                        ValidationWarning::at(WarningKind::UnparseableTimestamp, position)
                            .with_detail(format!("added_at={raw}")),
                    );
                }
                parsed
            }
        };
        let artist_id = match track.artists().first() {
            Some(primary) => non_empty(&primary.id),
            None => {
                warnings.push(ValidationWarning::at(WarningKind::MissingArtists, position));
                None
            }
        };

        rows.push(SongRow {
            song_id,
            song_name: track.name.clone(),
            duration_ms: track.duration_ms,
            url,
            popularity: track.popularity,
            song_added,
            album_id: track.album.as_ref().and_then(|album| non_empty(&album.id)),
            artist_id,
            extracted_at: stamps.extracted_at,
            transformed_at: stamps.transformed_at,
        });
    }

    (rows, warnings)
}

/// First occurrence of each id wins. Returns the rows kept and how many
/// were dropped.
fn dedup_by_id<T, F>(rows: Vec<T>, id: F) -> (Vec<T>, usize)
where
    F: Fn(&T) -> String,
{
    let before = rows.len();
    let kept: Vec<T> = rows.into_iter().unique_by(|row| id(row)).collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.trim().is_empty()).cloned()
}

/// `YYYY-MM-DD`, `YYYY-MM` or `YYYY`; missing parts default to the first.
pub fn parse_release_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.len() < 4 {
        return None;
    }
    let mut parts = raw.splitn(3, '-');
    let year: i32 = parts.next()?.parse().ok()?;
    let month: u32 = match parts.next() {
        Some(month) => month.parse().ok()?,
        None => 1,
    };
    let day: u32 = match parts.next() {
        Some(day) => day.parse().ok()?,
        None => 1,
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

/// RFC 3339, or a naive ISO-8601 date/time taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Album, Artist, ExternalUrls, Track};
    use chrono::TimeZone;

    fn artist(id: Option<&str>) -> Artist {
        Artist {
            id: id.map(String::from),
            name: id.map(|id| format!("Artist {id}")),
            external_urls: id.map(|id| ExternalUrls {
                spotify: Some(format!("https://open.spotify.com/artist/{id}")),
            }),
        }
    }

    fn album(id: Option<&str>) -> Album {
        Album {
            id: id.map(String::from),
            name: Some("Album".into()),
            release_date: Some("2019-07-12".into()),
            total_tracks: Some(11),
            album_type: Some("album".into()),
            label: Some("Label".into()),
            external_urls: None,
        }
    }

    fn membership(
        id: Option<&str>,
        album: Option<Album>,
        artists: Option<Vec<Artist>>,
    ) -> TrackMembership {
        TrackMembership {
            added_at: Some("2024-02-03T04:05:06Z".into()),
            track: Some(Track {
                id: id.map(String::from),
                name: id.map(|id| format!("Song {id}")),
                duration_ms: Some(200_000),
                popularity: Some(50),
                explicit: Some(false),
                external_urls: id.map(|id| ExternalUrls {
                    spotify: Some(format!("https://open.spotify.com/track/{id}")),
                }),
                album,
                artists,
            }),
        }
    }

    fn extraction(tracks: Vec<TrackMembership>) -> RawExtraction {
        RawExtraction {
            playlist_id: "37i9dQZF1DXcBWIGoYBM5M".into(),
            playlist_info: Default::default(),
            total_tracks: tracks.len(),
            tracks,
            extracted_at: Some("2024-06-01T12:00:00.250000Z".into()),
            extraction_timestamp: None,
        }
    }

    fn stamp(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, second).unwrap()
    }

    #[test]
    fn three_memberships_scenario() {
        let raw = extraction(vec![
            membership(
                Some("t1"),
                Some(album(Some("a1"))),
                Some(vec![artist(Some("r1")), artist(Some("r2"))]),
            ),
            membership(Some("t2"), Some(album(Some("a1"))), Some(vec![artist(Some("r2"))])),
            membership(Some("t3"), Some(album(Some("a1"))), None),
        ]);

        let batch = normalize(&raw, stamp(0));

        assert_eq!(batch.albums.len(), 1);
        assert_eq!(batch.songs.len(), 3);
        assert_eq!(batch.artists.len(), 2);
        let without_artist: Vec<_> = batch.songs.iter().filter(|s| s.artist_id.is_none()).collect();
        assert_eq!(without_artist.len(), 1);
        assert_eq!(without_artist[0].song_id, "t3");
        assert_eq!(batch.diagnostics.count(WarningKind::MissingArtists), 1);
        assert_eq!(batch.diagnostics.duplicates_dropped.albums, 2);
        assert_eq!(batch.diagnostics.duplicates_dropped.artists, 1);
    }

    #[test]
    fn missing_ids_follow_the_exclusion_policy() {
        let raw = extraction(vec![
            membership(None, Some(album(Some("a1"))), Some(vec![artist(Some("r1"))])),
            membership(Some("t2"), Some(album(None)), Some(vec![artist(None), artist(Some("r2"))])),
            TrackMembership {
                added_at: None,
                track: None,
            },
        ]);

        let batch = normalize(&raw, stamp(0));

        let song_ids: Vec<&str> = batch.songs.iter().map(|s| s.song_id.as_str()).collect();
        assert_eq!(song_ids, vec!["t2"]);
        assert_eq!(batch.songs[0].album_id, None);
        assert_eq!(batch.songs[0].artist_id, None);
        let album_ids: Vec<&str> = batch.albums.iter().map(|a| a.album_id.as_str()).collect();
        assert_eq!(album_ids, vec!["a1"]);
        let artist_ids: Vec<&str> = batch.artists.iter().map(|a| a.artist_id.as_str()).collect();
        assert_eq!(artist_ids, vec!["r1", "r2"]);

        let d = &batch.diagnostics;
        assert_eq!(d.count(WarningKind::MissingTrackId), 1);
        assert_eq!(d.count(WarningKind::MissingAlbumId), 1);
        assert_eq!(d.count(WarningKind::MissingArtistId), 1);
        assert_eq!(d.count(WarningKind::MissingTrack), 1);
        assert_eq!(d.summary().get("missing_track"), Some(&1));
    }

    #[test]
    fn first_occurrence_wins() {
        let mut first = membership(
            Some("t1"),
            Some(album(Some("a1"))),
            Some(vec![artist(Some("r1"))]),
        );
        let mut second = first.clone();
        if let Some(track) = first.track.as_mut() {
            track.name = Some("First".into());
        }
        if let Some(track) = second.track.as_mut() {
            track.name = Some("Second".into());
            track.popularity = Some(99);
        }

        let batch = normalize(&extraction(vec![first, second]), stamp(0));

        assert_eq!(batch.songs.len(), 1);
        assert_eq!(batch.songs[0].song_name.as_deref(), Some("First"));
        assert_eq!(batch.songs[0].popularity, Some(50));
        assert_eq!(batch.diagnostics.duplicates_dropped.songs, 1);
    }

    #[test]
    fn reruns_keep_id_membership() {
        let raw = extraction(vec![
            membership(Some("t1"), Some(album(Some("a1"))), Some(vec![artist(Some("r1"))])),
            membership(
                Some("t2"),
                Some(album(Some("a2"))),
                Some(vec![artist(Some("r2")), artist(Some("r1"))]),
            ),
            membership(Some("t1"), Some(album(Some("a1"))), Some(vec![artist(Some("r1"))])),
        ]);
        let mut clock = RunClock::new();
        let first = normalize(&raw, clock.next_stamp());
        let second = normalize(&raw, clock.next_stamp());

        let ids = |batch: &NormalizedBatch| {
            (
                batch.albums.iter().map(|r| r.album_id.clone()).collect::<Vec<_>>(),
                batch.artists.iter().map(|r| r.artist_id.clone()).collect::<Vec<_>>(),
                batch.songs.iter().map(|r| r.song_id.clone()).collect::<Vec<_>>(),
            )
        };
        assert_eq!(ids(&first), ids(&second));
        assert_ne!(first.transformed_at, second.transformed_at);
    }

    #[test]
    fn every_row_carries_the_run_stamps() {
        let raw = extraction(vec![
            membership(Some("t1"), Some(album(Some("a1"))), Some(vec![artist(Some("r1"))])),
            membership(Some("t2"), Some(album(Some("a2"))), Some(vec![artist(Some("r2"))])),
        ]);
        let transformed_at = stamp(30);
        let batch = normalize(&raw, transformed_at);
        let extracted_at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
            + Duration::milliseconds(250);

        assert_eq!(batch.extracted_at, Some(extracted_at));
        let stamped = |e: Option<DateTime<Utc>>, t: DateTime<Utc>| {
            e == Some(extracted_at) && t == transformed_at
        };
        assert!(batch
            .albums
            .iter()
            .all(|r| stamped(r.extracted_at, r.transformed_at)));
        assert!(batch
            .artists
            .iter()
            .all(|r| stamped(r.extracted_at, r.transformed_at)));
        assert!(batch
            .songs
            .iter()
            .all(|r| stamped(r.extracted_at, r.transformed_at)));
        assert!(!batch.diagnostics.extracted_at_synthesized());
    }

    #[test]
    fn absent_stamp_is_synthesized_and_reported() {
        let mut raw = extraction(vec![membership(Some("t1"), None, None)]);
        raw.extracted_at = None;

        let batch = normalize(&raw, stamp(0));

        assert!(batch.extracted_at.is_some());
        assert!(batch.diagnostics.extracted_at_synthesized());
        assert_eq!(batch.songs[0].extracted_at, batch.extracted_at);
        assert_eq!(batch.diagnostics.count(WarningKind::MissingAlbum), 1);
    }

    #[test]
    fn unparseable_stamp_becomes_null() {
        let mut raw = extraction(vec![membership(Some("t1"), Some(album(Some("a1"))), None)]);
        raw.extracted_at = Some("yesterday".into());
        if let Some(track) = raw.tracks[0].track.as_mut() {
            if let Some(album) = track.album.as_mut() {
                album.release_date = Some("0000-00".into());
            }
        }
        raw.tracks[0].added_at = Some("not a date".into());

        let batch = normalize(&raw, stamp(0));

        assert_eq!(batch.extracted_at, None);
        assert_eq!(batch.albums[0].release_date, None);
        assert_eq!(batch.songs[0].song_added, None);
        assert_eq!(batch.diagnostics.count(WarningKind::UnparseableTimestamp), 3);
        assert!(!batch.diagnostics.extracted_at_synthesized());
    }

    #[test]
    fn release_date_precisions() {
        assert_eq!(parse_release_date("1999"), NaiveDate::from_ymd_opt(1999, 1, 1));
        assert_eq!(parse_release_date("1999-04"), NaiveDate::from_ymd_opt(1999, 4, 1));
        assert_eq!(parse_release_date("1999-04-23"), NaiveDate::from_ymd_opt(1999, 4, 23));
        assert_eq!(parse_release_date("1999-13-01"), None);
        assert_eq!(parse_release_date(""), None);
        assert_eq!(parse_release_date("soon"), None);
    }

    #[test]
    fn timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(parse_timestamp("2024-01-02T03:04:05Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02T05:04:05+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02T03:04:05"), Some(expected));
        assert_eq!(
            parse_timestamp("2024-01-02T03:04:05.500000"),
            Some(expected + Duration::milliseconds(500))
        );
        assert_eq!(parse_timestamp("2024-01-02 03:04:05"), Some(expected));
        assert!(parse_timestamp("2024-01-02").is_some());
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn run_clock_is_strictly_increasing() {
        let mut clock = RunClock::new();
        let stamps: Vec<_> = (0..50).map(|_| clock.next_stamp()).collect();
        assert!(stamps.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(stamps.iter().all(|s| s.timestamp_subsec_nanos() % 1_000 == 0));
    }
}
