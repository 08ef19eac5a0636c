//! HLS manifest to format conversion.

use http::HeaderMap;
use m3u8_rs::{MasterPlaylist, Playlist, VariantStream};
use url::Url;

use super::types::{ExtractorError, ExtractorResult, StreamFormat};

const HLS_PROTOCOL: &str = "m3u8";

pub struct HlsOptions<'a> {
    pub ext: &'static str,
    pub format_id_prefix: &'a str,
    pub live: bool,
    pub http_headers: &'a HeaderMap,
}

/// Parses `manifest` fetched from `manifest_url` into formats.
///
/// A master playlist yields one format per non I-frame variant, a media
/// playlist yields a single format pointing at the manifest itself.
pub fn extract_m3u8_formats(
    manifest: &[u8],
    manifest_url: &Url,
    options: &HlsOptions<'_>,
) -> ExtractorResult<Vec<StreamFormat>> {
    let playlist = m3u8_rs::parse_playlist_res(manifest).map_err(|_| ExtractorError::Manifest {
        url: manifest_url.clone(),
        reason: "not a valid M3U8 playlist".into(),
    })?;

    match playlist {
        Playlist::MasterPlaylist(master) => variant_formats(&master, manifest_url, options),
        Playlist::MediaPlaylist(_) => Ok(vec![StreamFormat {
            format_id: options.format_id_prefix.to_string(),
            url: manifest_url.clone(),
            manifest_url: manifest_url.clone(),
            protocol: HLS_PROTOCOL,
            ext: options.ext,
            tbr: None,
            width: None,
            height: None,
            fps: None,
            codecs: None,
            is_live: options.live,
            http_headers: options.http_headers.clone(),
        }]),
    }
}

fn variant_formats(
    master: &MasterPlaylist,
    manifest_url: &Url,
    options: &HlsOptions<'_>,
) -> ExtractorResult<Vec<StreamFormat>> {
    let mut formats: Vec<StreamFormat> = Vec::new();

    for variant in master.variants.iter().filter(|v| !v.is_i_frame) {
        let url = manifest_url
            .join(&variant.uri)
            .map_err(|err| ExtractorError::Manifest {
                url: manifest_url.clone(),
                reason: format!("invalid variant URI {:?}: {err}", variant.uri),
            })?;
        let tbr = bitrate_kbps(variant);

        let mut format_id = match tbr {
            Some(tbr) => format!("{}-{}", options.format_id_prefix, tbr.round() as u64),
            None => format!("{}-{}", options.format_id_prefix, formats.len()),
        };
        if formats.iter().any(|f| f.format_id == format_id) {
            format_id = format!("{format_id}-{}", formats.len());
        }

        formats.push(StreamFormat {
            format_id,
            url,
            manifest_url: manifest_url.clone(),
            protocol: HLS_PROTOCOL,
            ext: options.ext,
            tbr,
            width: variant.resolution.as_ref().map(|r| r.width),
            height: variant.resolution.as_ref().map(|r| r.height),
            fps: variant.frame_rate,
            codecs: variant.codecs.clone(),
            is_live: options.live,
            http_headers: options.http_headers.clone(),
        });
    }

    Ok(formats)
}

fn bitrate_kbps(variant: &VariantStream) -> Option<f64> {
    let bps = variant.average_bandwidth.unwrap_or(variant.bandwidth);
    (bps > 0).then(|| bps as f64 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-STREAM-INF:BANDWIDTH=2500000,RESOLUTION=1280x720,CODECS=\"avc1.64001f,mp4a.40.2\",FRAME-RATE=25.000
720p/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=800000,AVERAGE-BANDWIDTH=750000,RESOLUTION=640x360
https://cdn.example/360p/index.m3u8
#EXT-X-I-FRAME-STREAM-INF:BANDWIDTH=100000,URI=\"iframe.m3u8\"
";

    const MEDIA: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:6
#EXT-X-MEDIA-SEQUENCE:100
#EXTINF:6.0,
seg100.ts
#EXTINF:6.0,
seg101.ts
";

    fn options(headers: &HeaderMap) -> HlsOptions<'_> {
        HlsOptions {
            ext: "mp4",
            format_id_prefix: "hls",
            live: true,
            http_headers: headers,
        }
    }

    #[test]
    fn master_playlist_yields_variant_formats() {
        let headers = HeaderMap::new();
        let manifest_url = Url::parse("https://live.example/ch/master.m3u8").unwrap();
        let formats = extract_m3u8_formats(MASTER.as_bytes(), &manifest_url, &options(&headers)).unwrap();

        assert_eq!(formats.len(), 2);

        let hd = &formats[0];
        assert_eq!(hd.format_id, "hls-2500");
        assert_eq!(hd.url.as_str(), "https://live.example/ch/720p/index.m3u8");
        assert_eq!((hd.width, hd.height), (Some(1280), Some(720)));
        assert_eq!(hd.codecs.as_deref(), Some("avc1.64001f,mp4a.40.2"));
        assert_eq!(hd.protocol, "m3u8");
        assert_eq!(hd.ext, "mp4");
        assert!(hd.is_live);

        let sd = &formats[1];
        assert_eq!(sd.format_id, "hls-750");
        assert_eq!(sd.url.as_str(), "https://cdn.example/360p/index.m3u8");
    }

    #[test]
    fn media_playlist_is_a_single_format() {
        let headers = HeaderMap::new();
        let manifest_url = Url::parse("https://live.example/ch/index.m3u8").unwrap();
        let formats = extract_m3u8_formats(MEDIA.as_bytes(), &manifest_url, &options(&headers)).unwrap();
        assert_eq!(formats.len(), 1);
        assert_eq!(formats[0].format_id, "hls");
        assert_eq!(formats[0].url, manifest_url);
    }

    #[test]
    fn garbage_is_a_manifest_error() {
        let headers = HeaderMap::new();
        let manifest_url = Url::parse("https://live.example/x.m3u8").unwrap();
        let err = extract_m3u8_formats(b"<html>nope</html>", &manifest_url, &options(&headers)).unwrap_err();
        assert!(matches!(err, ExtractorError::Manifest { .. }));
    }
}
