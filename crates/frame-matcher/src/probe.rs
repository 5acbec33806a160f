//! Metadata probe: parses ffprobe's JSON description of a video.

use crate::error::{MatchError, Result};
use crate::types::VideoMetadata;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Parse a rational frame rate such as `30000/1001` or `25`
pub fn parse_frame_rate(rate: &str) -> Result<f64> {
    let rate = rate.trim();
    let fps = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num
                .trim()
                .parse()
                .map_err(|_| MatchError::Metadata(format!("unparsable frame rate '{}'", rate)))?;
            let den: f64 = den
                .trim()
                .parse()
                .map_err(|_| MatchError::Metadata(format!("unparsable frame rate '{}'", rate)))?;
            if den == 0.0 {
                return Err(MatchError::Metadata(format!(
                    "frame rate '{}' has a zero denominator",
                    rate
                )));
            }
            num / den
        }
        None => rate
            .parse()
            .map_err(|_| MatchError::Metadata(format!("unparsable frame rate '{}'", rate)))?,
    };

    if !fps.is_finite() || fps <= 0.0 {
        return Err(MatchError::Metadata(format!("invalid frame rate '{}'", rate)));
    }

    Ok(fps)
}

/// Build [`VideoMetadata`] from `ffprobe -show_format -show_streams` JSON.
///
/// The first video stream wins. The frame count comes from the container's
/// `nb_frames` when present, otherwise from duration times frame rate.
pub fn parse_probe_json(json: &[u8]) -> Result<VideoMetadata> {
    let probe: ProbeOutput = serde_json::from_slice(json)
        .map_err(|e| MatchError::Metadata(format!("unreadable probe output: {}", e)))?;

    let stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| MatchError::Metadata("no video stream found".to_string()))?;

    // r_frame_rate is "0/0" for some variable-rate streams
    let fps = match stream.r_frame_rate.as_deref().map(parse_frame_rate) {
        Some(Ok(fps)) => fps,
        _ => parse_frame_rate(stream.avg_frame_rate.as_deref().unwrap_or_default())?,
    };

    let duration_seconds = stream
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .or_else(|| {
            probe
                .format
                .as_ref()
                .and_then(|f| f.duration.as_deref())
                .and_then(|d| d.parse::<f64>().ok())
        })
        .unwrap_or(0.0);

    let frame_count = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|&n| n > 0)
        .unwrap_or_else(|| (duration_seconds * fps).round() as u64);

    Ok(VideoMetadata {
        fps,
        duration_seconds,
        frame_count,
        width: stream.width.unwrap_or(0),
        height: stream.height.unwrap_or(0),
    })
}
