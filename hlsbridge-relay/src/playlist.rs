// Media playlist parsing
//
// Only what the relay needs: the media lines in order, their sequence numbers
// and whether the broadcast has ended. Tags other than the ones below are ignored.

use tracing::warn;
use url::Url;

use crate::error::{RelayError, RelayResult};

const TAG_HEADER: &str = "#EXTM3U";
const TAG_MEDIA_SEQUENCE: &str = "#EXT-X-MEDIA-SEQUENCE:";
const TAG_STREAM_INF: &str = "#EXT-X-STREAM-INF";
const TAG_ENDLIST: &str = "#EXT-X-ENDLIST";

/// One media segment listed by the manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRef {
    /// Media sequence number (`EXT-X-MEDIA-SEQUENCE` + position)
    pub sequence: u64,
    /// Absolute URL, resolved against the manifest's own URL
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPlaylist {
    pub media_sequence: u64,
    pub segments: Vec<SegmentRef>,
    /// `EXT-X-ENDLIST` was present
    pub ended: bool,
}

impl MediaPlaylist {
    #[must_use]
    pub fn highest_sequence(&self) -> Option<u64> {
        self.segments.last().map(|s| s.sequence)
    }
}

/// Parse a live media playlist fetched from `manifest_url`.
pub fn parse_media_playlist(text: &str, manifest_url: &Url) -> RelayResult<MediaPlaylist> {
    let body = text.trim_start_matches('\u{feff}').trim_start();
    if !body.starts_with(TAG_HEADER) {
        return Err(RelayError::Source(format!(
            "{manifest_url} is not an HLS playlist"
        )));
    }

    let mut media_sequence = 0u64;
    let mut ended = false;
    let mut uris = Vec::new();

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(value) = line.strip_prefix(TAG_MEDIA_SEQUENCE) {
            media_sequence = value.trim().parse().map_err(|_| {
                RelayError::Source(format!("Invalid media sequence \"{value}\" in {manifest_url}"))
            })?;
        } else if line.starts_with(TAG_STREAM_INF) {
            return Err(RelayError::Source(format!(
                "{manifest_url} is a master playlist; a media playlist URL is required"
            )));
        } else if line.starts_with(TAG_ENDLIST) {
            ended = true;
        } else if !line.starts_with('#') {
            uris.push(line);
        }
    }

    let mut segments = Vec::with_capacity(uris.len());
    for (position, uri) in uris.into_iter().enumerate() {
        let sequence = media_sequence.checked_add(position as u64).ok_or_else(|| {
            RelayError::Source(format!(
                "Media sequence overflows at entry {position} of {manifest_url}"
            ))
        })?;
        match manifest_url.join(uri) {
            Ok(url) => segments.push(SegmentRef {
                sequence,
                url: url.to_string(),
            }),
            Err(e) => warn!(uri, error = %e, "Skipping unresolvable playlist entry"),
        }
    }

    Ok(MediaPlaylist {
        media_sequence,
        segments,
        ended,
    })
}
