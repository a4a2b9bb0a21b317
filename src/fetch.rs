use chrono::{SecondsFormat, Utc};
use reqwest::{header, Client, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::auth::AccessToken;
use crate::config::ApiSettings;
use crate::error::{EtlError, Result};
use crate::types::{PlaylistInfo, RawExtraction, TrackMembership, TracksPage};

const PLAYLIST_MARKER: &str = "spotify.com/playlist/";
const PLAYLIST_ID_LEN: usize = 22;

const PLAYLIST_FIELDS: &str = "name,description,owner,public,followers";

// Normalization depends on every field listed here.
const TRACK_FIELDS: &str = concat!(
    "items(",
    "added_at,",
    "track(",
    "id,name,duration_ms,popularity,explicit,external_urls,",
    "album(id,name,release_date,total_tracks,album_type,label,external_urls),",
    "artists(id,name,external_urls)",
    ")",
    "),",
    "next,total"
);

/// Pulls the 22 character playlist id out of a share link such as
/// `https://open.spotify.com/playlist/37i9dQZF1DXcBWIGoYBM5M?si=abc`.
pub fn parse_playlist_id(link: &str) -> Result<String> {
    let link = link.trim();
    if link.is_empty() {
        return Err(EtlError::InvalidIdentifier("no playlist link provided".into()));
    }
    if !link.contains(PLAYLIST_MARKER) {
        return Err(EtlError::InvalidIdentifier(format!(
            "not a playlist URL: {link}"
        )));
    }
    let segment = link.rsplit('/').next().unwrap_or_default();
    let id = segment.split('?').next().unwrap_or_default();
    if id.chars().count() != PLAYLIST_ID_LEN {
        return Err(EtlError::InvalidIdentifier(format!(
            "playlist id {id:?} is not {PLAYLIST_ID_LEN} characters"
        )));
    }
    debug!(playlist_id = %id, "Parsed playlist id");
    Ok(id.to_string())
}

pub fn get_client(timeout: std::time::Duration) -> Result<Client> {
    let mut headers = header::HeaderMap::new();
    headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
    Client::builder()
        .default_headers(headers)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
        .map_err(|e| EtlError::Internal(format!("cannot build HTTP client: {e}")))
}

/// Reads one playlist through the Web API: metadata once, then every
/// page of tracks until the API stops returning a `next` link.
pub struct PlaylistExtractor {
    client: Client,
    api_base: String,
    page_size: usize,
    market: Option<String>,
}

impl PlaylistExtractor {
    pub fn new(client: Client, settings: &ApiSettings) -> Self {
        Self {
            client,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            page_size: settings.page_size,
            market: settings.market.clone(),
        }
    }

    pub async fn extract(&self, token: &AccessToken, playlist_id: &str) -> Result<RawExtraction> {
        let playlist_info = self.fetch_playlist_info(token, playlist_id).await?;
        let tracks = self.fetch_all_memberships(token, playlist_id).await?;
        let extracted_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

        info!(
            playlist_id = %playlist_id,
            tracks = tracks.len(),
            "Extracted playlist"
        );
        Ok(RawExtraction {
            playlist_id: playlist_id.to_string(),
            playlist_info,
            total_tracks: tracks.len(),
            tracks,
            extracted_at: Some(extracted_at),
            extraction_timestamp: None,
        })
    }

    async fn fetch_playlist_info(
        &self,
        token: &AccessToken,
        playlist_id: &str,
    ) -> Result<PlaylistInfo> {
        let url = format!("{}/playlists/{}", self.api_base, playlist_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(token.secret())
            .query(&[("fields", PLAYLIST_FIELDS)])
            .send()
            .await
            .map_err(|e| EtlError::Extraction(format!("playlist request failed: {e}")))?;
        read_json(response, "playlist").await
    }

    async fn fetch_all_memberships(
        &self,
        token: &AccessToken,
        playlist_id: &str,
    ) -> Result<Vec<TrackMembership>> {
        let mut all_items = Vec::new();
        let mut offset = 0;

        loop {
            let page = self.fetch_page(token, playlist_id, offset).await?;
            all_items.extend(page.items);
            debug!(offset, accumulated = all_items.len(), "Fetched tracks page");

            if page.next.is_none() {
                if let Some(total) = page.total {
                    if total != all_items.len() as u64 {
                        warn!(
                            reported = total,
                            accumulated = all_items.len(),
                            "Track count differs from the total reported by the API"
                        );
                    }
                }
                break;
            }
            offset += self.page_size;
        }

        Ok(all_items)
    }

    async fn fetch_page(
        &self,
        token: &AccessToken,
        playlist_id: &str,
        offset: usize,
    ) -> Result<TracksPage> {
        let url = format!("{}/playlists/{}/tracks", self.api_base, playlist_id);
        let mut params = vec![
            ("limit", self.page_size.to_string()),
            ("offset", offset.to_string()),
            ("fields", TRACK_FIELDS.to_string()),
        ];
        if let Some(market) = &self.market {
            params.push(("market", market.clone()));
        }

        let response = self
            .client
            .get(&url)
            .bearer_auth(token.secret())
            .query(&params)
            .send()
            .await
            .map_err(|e| EtlError::Extraction(format!("tracks request failed: {e}")))?;
        read_json(response, "tracks").await
    }
}

async fn read_json<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(EtlError::Extraction(format!(
            "{what} fetch failed ({status}): {body}"
        )));
    }
    response
        .json()
        .await
        .map_err(|e| EtlError::Extraction(format!("unexpected {what} response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ID: &str = "37i9dQZF1DXcBWIGoYBM5M";

    #[test]
    fn parses_id_from_share_link() {
        let link = format!("https://open.spotify.com/playlist/{ID}?si=4f2a");
        assert_eq!(parse_playlist_id(&link).unwrap(), ID);
        let bare = format!("https://open.spotify.com/playlist/{ID}");
        assert_eq!(parse_playlist_id(&bare).unwrap(), ID);
    }

    #[test]
    fn rejects_links_without_marker_or_wrong_length() {
        for link in [
            "",
            "https://open.spotify.com/album/37i9dQZF1DXcBWIGoYBM5M",
            "https://open.spotify.com/playlist/short",
            "https://open.spotify.com/playlist/37i9dQZF1DXcBWIGoYBM5Mx?si=1",
            "https://open.spotify.com/playlist/",
        ] {
            let err = parse_playlist_id(link).unwrap_err();
            assert!(matches!(err, EtlError::InvalidIdentifier(_)), "{link}");
        }
    }

    fn settings(server: &MockServer, page_size: usize) -> ApiSettings {
        ApiSettings {
            api_base: format!("{}/v1", server.uri()),
            page_size,
            ..ApiSettings::default()
        }
    }

    fn item(n: usize) -> Value {
        json!({
            "added_at": "2024-01-01T00:00:00Z",
            "track": {"id": format!("track{n}"), "name": format!("Song {n}"), "artists": []}
        })
    }

    async fn mount_metadata(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path(format!("/v1/playlists/{ID}")))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "Road trip",
                "public": true,
                "followers": {"total": 12}
            })))
            .mount(server)
            .await;
    }

    async fn mount_page(
        server: &MockServer,
        offset: usize,
        range: std::ops::Range<usize>,
        last: bool,
    ) {
        let items: Vec<Value> = range.map(item).collect();
        let next = (!last).then(|| format!("{}/next", server.uri()));
        Mock::given(method("GET"))
            .and(path(format!("/v1/playlists/{ID}/tracks")))
            .and(query_param("offset", offset.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": items,
                "next": next,
                "total": 250
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn accumulates_every_page_in_order() {
        let server = MockServer::start().await;
        mount_metadata(&server).await;
        mount_page(&server, 0, 0..100, false).await;
        mount_page(&server, 100, 100..200, false).await;
        mount_page(&server, 200, 200..250, true).await;

        let extractor = PlaylistExtractor::new(Client::new(), &settings(&server, 100));
        let raw = extractor.extract(&AccessToken::new("tok"), ID).await.unwrap();

        assert_eq!(raw.tracks.len(), 250);
        assert_eq!(raw.total_tracks, 250);
        let ids: Vec<String> = raw
            .tracks
            .iter()
            .map(|m| m.track.as_ref().unwrap().id.clone().unwrap())
            .collect();
        let expected: Vec<String> = (0..250).map(|n| format!("track{n}")).collect();
        assert_eq!(ids, expected);
        assert_eq!(raw.playlist_info.name.as_deref(), Some("Road trip"));
        assert!(raw.extracted_at.is_some());
    }

    #[tokio::test]
    async fn requests_every_field_normalization_needs() {
        let server = MockServer::start().await;
        mount_metadata(&server).await;
        Mock::given(method("GET"))
            .and(path(format!("/v1/playlists/{ID}/tracks")))
            .and(query_param("fields", TRACK_FIELDS))
            .and(query_param("limit", "100"))
            .and(query_param("market", "MY"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [item(0)], "next": null, "total": 1
            })))
            .expect(1)
            .mount(&server)
            .await;

        let extractor = PlaylistExtractor::new(Client::new(), &settings(&server, 100));
        let raw = extractor.extract(&AccessToken::new("tok"), ID).await.unwrap();
        assert_eq!(raw.tracks.len(), 1);
        for field in [
            "added_at",
            "external_urls",
            "album_type",
            "label",
            "artists(id,name,external_urls)",
        ] {
            assert!(TRACK_FIELDS.contains(field), "{field}");
        }
    }

    #[tokio::test]
    async fn error_mid_loop_fails_whole_extraction() {
        let server = MockServer::start().await;
        mount_metadata(&server).await;
        mount_page(&server, 0, 0..100, false).await;
        Mock::given(method("GET"))
            .and(path(format!("/v1/playlists/{ID}/tracks")))
            .and(query_param("offset", "100"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let extractor = PlaylistExtractor::new(Client::new(), &settings(&server, 100));
        let err = extractor.extract(&AccessToken::new("tok"), ID).await.unwrap_err();
        assert!(matches!(err, EtlError::Extraction(ref m) if m.contains("bad gateway")));
    }

    #[tokio::test]
    async fn metadata_failure_carries_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/v1/playlists/{ID}")))
            .respond_with(ResponseTemplate::new(404).set_body_string("Resource not found"))
            .mount(&server)
            .await;

        let extractor = PlaylistExtractor::new(Client::new(), &settings(&server, 100));
        let err = extractor.extract(&AccessToken::new("tok"), ID).await.unwrap_err();
        assert!(matches!(err, EtlError::Extraction(ref m) if m.contains("Resource not found")));
    }

    #[tokio::test]
    async fn page_without_items_is_an_extraction_error() {
        let server = MockServer::start().await;
        mount_metadata(&server).await;
        Mock::given(method("GET"))
            .and(path(format!("/v1/playlists/{ID}/tracks")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"next": null})))
            .mount(&server)
            .await;

        let extractor = PlaylistExtractor::new(Client::new(), &settings(&server, 100));
        let err = extractor.extract(&AccessToken::new("tok"), ID).await.unwrap_err();
        assert!(matches!(err, EtlError::Extraction(_)));
    }
}
