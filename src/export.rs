//! CSV exports of normalized rows.
//!
//! Null cells are written as nothing at all, empty strings as `""`, so the
//! two stay distinguishable when loaded back.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::normalize::NormalizedBatch;
use crate::storage::ObjectStorage;
use crate::types::{AlbumRow, ArtistRow, SongRow};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
const KEY_STAMP: &str = "%Y%m%d_%H%M%S_%6f";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Album,
    Artist,
    Song,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Album => "album",
            EntityKind::Artist => "artist",
            EntityKind::Song => "song",
        }
    }

    pub fn export_key(self, transformed_at: DateTime<Utc>) -> String {
        let kind = self.as_str();
        format!(
            "transformed_data/{kind}_data/{kind}_{}.csv",
            transformed_at.format(KEY_STAMP)
        )
    }
}

pub type Cell = Option<String>;

pub trait ExportRecord {
    const KIND: EntityKind;
    const COLUMNS: &'static [&'static str];

    /// One cell per entry of `COLUMNS`, same order.
    fn cells(&self) -> Vec<Cell>;
}

fn text(value: &Option<String>) -> Cell {
    value.clone()
}

fn number<T: ToString>(value: Option<T>) -> Cell {
    value.map(|v| v.to_string())
}

fn timestamp(value: Option<DateTime<Utc>>) -> Cell {
    value.map(|v| v.format(TIMESTAMP_FORMAT).to_string())
}

fn date(value: Option<NaiveDate>) -> Cell {
    value.map(|v| v.format("%Y-%m-%d").to_string())
}

impl ExportRecord for AlbumRow {
    const KIND: EntityKind = EntityKind::Album;
    const COLUMNS: &'static [&'static str] = &[
        "album_id",
        "album_name",
        "release_date",
        "total_tracks",
        "album_url",
        "album_type",
        "label",
        "extracted_at",
        "transformed_at",
    ];

    fn cells(&self) -> Vec<Cell> {
        vec![
            Some(self.album_id.clone()),
            text(&self.album_name),
            date(self.release_date),
            number(self.total_tracks),
            text(&self.album_url),
            text(&self.album_type),
            text(&self.label),
            timestamp(self.extracted_at),
            timestamp(Some(self.transformed_at)),
        ]
    }
}

impl ExportRecord for ArtistRow {
    const KIND: EntityKind = EntityKind::Artist;
    const COLUMNS: &'static [&'static str] = &[
        "artist_id",
        "artist_name",
        "artist_url",
        "extracted_at",
        "transformed_at",
    ];

    fn cells(&self) -> Vec<Cell> {
        vec![
            Some(self.artist_id.clone()),
            text(&self.artist_name),
            text(&self.artist_url),
            timestamp(self.extracted_at),
            timestamp(Some(self.transformed_at)),
        ]
    }
}

impl ExportRecord for SongRow {
    const KIND: EntityKind = EntityKind::Song;
    const COLUMNS: &'static [&'static str] = &[
        "song_id",
        "song_name",
        "duration_ms",
        "url",
        "popularity",
        "song_added",
        "album_id",
        "artist_id",
        "extracted_at",
        "transformed_at",
    ];

    fn cells(&self) -> Vec<Cell> {
        vec![
            Some(self.song_id.clone()),
            text(&self.song_name),
            number(self.duration_ms),
            text(&self.url),
            number(self.popularity),
            timestamp(self.song_added),
            text(&self.album_id),
            text(&self.artist_id),
            timestamp(self.extracted_at),
            timestamp(Some(self.transformed_at)),
        ]
    }
}

fn encode_cell(cell: &Cell, out: &mut String) {
    let Some(value) = cell else {
        return;
    };
    let needs_quotes = value.is_empty()
        || value.contains(|c: char| matches!(c, ',' | '"' | '\n' | '\r'));
    if needs_quotes {
        out.push('"');
        out.push_str(&value.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(value);
    }
}

/// Header row plus one line per record, `\n` terminated.
pub fn to_csv<R: ExportRecord>(rows: &[R]) -> String {
    let mut out = R::COLUMNS.join(",");
    out.push('\n');
    for row in rows {
        for (i, cell) in row.cells().iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            encode_cell(cell, &mut out);
        }
        out.push('\n');
    }
    out
}

/// Keys written for one normalization run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportKeys {
    pub album: String,
    pub song: String,
    pub artist: String,
}

#[derive(Debug, Clone)]
pub struct ExportWriter {
    storage: ObjectStorage,
}

impl ExportWriter {
    pub fn new(storage: ObjectStorage) -> Self {
        Self { storage }
    }

    pub async fn write_batch(&self, batch: &NormalizedBatch) -> Result<ExportKeys> {
        let album = self.write(&batch.albums, batch.transformed_at).await?;
        let song = self.write(&batch.songs, batch.transformed_at).await?;
        let artist = self.write(&batch.artists, batch.transformed_at).await?;
        Ok(ExportKeys {
            album,
            song,
            artist,
        })
    }

    async fn write<R: ExportRecord>(
        &self,
        rows: &[R],
        transformed_at: DateTime<Utc>,
    ) -> Result<String> {
        let key = R::KIND.export_key(transformed_at);
        self.storage.put(&key, to_csv(rows).into_bytes()).await?;
        info!(key = %key, rows = rows.len(), "Saved export");
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn transformed_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 2, 10, 11, 12).unwrap() + Duration::microseconds(345)
    }

    fn song(id: &str) -> SongRow {
        SongRow {
            song_id: id.into(),
            song_name: Some("Hello, \"World\"".into()),
            duration_ms: Some(201_000),
            url: Some(String::new()),
            popularity: None,
            song_added: None,
            album_id: Some("a1".into()),
            artist_id: None,
            extracted_at: Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()),
            transformed_at: transformed_at(),
        }
    }

    #[test]
    fn header_and_cells_keep_column_order() {
        let csv = to_csv(&[song("t1")]);
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("song_id,song_name,duration_ms,url,popularity,song_added,album_id,artist_id,extracted_at,transformed_at")
        );
        assert_eq!(
            lines.next(),
            Some("t1,\"Hello, \"\"World\"\"\",201000,\"\",,,a1,,2024-06-01 00:00:00.000000,2024-06-02 10:11:12.000345")
        );
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn empty_collection_still_has_header() {
        let rows: Vec<ArtistRow> = Vec::new();
        assert_eq!(
            to_csv(&rows),
            "artist_id,artist_name,artist_url,extracted_at,transformed_at\n"
        );
    }

    #[test]
    fn album_dates_and_counts() {
        let row = AlbumRow {
            album_id: "a1".into(),
            album_name: Some("Line\nbreak".into()),
            release_date: NaiveDate::from_ymd_opt(2001, 2, 1),
            total_tracks: Some(12),
            album_url: None,
            album_type: Some("compilation".into()),
            label: None,
            extracted_at: None,
            transformed_at: transformed_at(),
        };
        assert_eq!(row.cells().len(), AlbumRow::COLUMNS.len());
        let csv = to_csv(&[row]);
        assert!(csv.contains(
            "a1,\"Line\nbreak\",2001-02-01,12,,compilation,,,2024-06-02 10:11:12.000345\n"
        ));
    }

    #[test]
    fn keys_carry_the_run_stamp() {
        assert_eq!(
            EntityKind::Album.export_key(transformed_at()),
            "transformed_data/album_data/album_20240602_101112_000345.csv"
        );
        assert_eq!(
            EntityKind::Song.export_key(transformed_at()),
            "transformed_data/song_data/song_20240602_101112_000345.csv"
        );
    }
}
