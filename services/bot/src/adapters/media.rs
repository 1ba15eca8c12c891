//! services/bot/src/adapters/media.rs
//!
//! Media inspection and rewriting. Audio tags are read and written in-process with
//! `lofty`; containers lofty does not handle (and all video) go through the external
//! `ffprobe`/`ffmpeg` binaries.
//!
//! Extraction is lenient: every probe is optional and a failing one only leaves its
//! fields at the defaults of [`FileDescription::new`].

use async_trait::async_trait;
use lofty::config::WriteOptions;
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::Tag;
use renamer_core::domain::{FileDescription, MediaCategory, TagSet};
use renamer_core::naming::split_extension;
use renamer_core::ports::{
    MetadataExtractor, MetadataWriter, PortError, PortResult, ThumbnailExtractor,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default seek position for video previews.
const THUMBNAIL_OFFSET: Duration = Duration::from_secs(30);

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// Implements the metadata and thumbnail ports on top of lofty and ffmpeg.
#[derive(Clone, Debug)]
pub struct MediaToolkit {
    ffprobe: String,
    ffmpeg: String,
}

impl MediaToolkit {
    pub fn new(ffprobe: impl Into<String>, ffmpeg: impl Into<String>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
            ffmpeg: ffmpeg.into(),
        }
    }

    async fn probe_with_ffprobe(&self, path: &Path) -> PortResult<ProbeReport> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .output()
            .await
            .map_err(|e| PortError::Unexpected(format!("failed to run ffprobe: {e}")))?;

        if !output.status.success() {
            return Err(PortError::Unexpected(format!(
                "ffprobe exited with {}",
                output.status
            )));
        }

        let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| PortError::Unexpected(format!("unreadable ffprobe output: {e}")))?;
        Ok(parse_ffprobe(parsed))
    }

    async fn write_video_tags(&self, path: &Path, tags: &TagSet) -> PortResult<()> {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (_, extension) = split_extension(&file_name);
        // ffmpeg picks the muxer from the output extension, so the temp file keeps it.
        let staging = path.with_file_name(format!(".tagging_{}{}", Uuid::new_v4().simple(), extension));

        let mut command = Command::new(&self.ffmpeg);
        command
            .args(["-y", "-v", "error", "-i"])
            .arg(path)
            .args(["-map", "0", "-c", "copy"]);
        for (key, value) in metadata_pairs(tags) {
            command.arg("-metadata").arg(format!("{key}={value}"));
        }
        command.arg(&staging);

        let result = command.output().await;
        let outcome = match result {
            Ok(output) if output.status.success() => tokio::fs::rename(&staging, path)
                .await
                .map_err(|e| PortError::Unexpected(format!("failed to replace original: {e}"))),
            Ok(output) => Err(PortError::Unexpected(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
            Err(e) => Err(PortError::Unexpected(format!("failed to run ffmpeg: {e}"))),
        };

        if outcome.is_err() {
            let _ = tokio::fs::remove_file(&staging).await;
        }
        outcome
    }
}

//=========================================================================================
// Probe Results
//=========================================================================================

/// Whatever one probe managed to read. `None` fields leave the description untouched.
#[derive(Debug, Default, Clone, PartialEq)]
struct ProbeReport {
    title: Option<String>,
    artist: Option<String>,
    album: Option<String>,
    year: Option<String>,
    genre: Option<String>,
    duration: Option<Duration>,
    bitrate_kbps: Option<u32>,
    codec: Option<String>,
    resolution: Option<String>,
}

impl ProbeReport {
    fn apply(self, desc: &mut FileDescription) {
        fn set(slot: &mut String, value: Option<String>) {
            if let Some(value) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
                *slot = value;
            }
        }
        set(&mut desc.title, self.title);
        set(&mut desc.artist, self.artist);
        set(&mut desc.album, self.album);
        set(&mut desc.year, self.year);
        set(&mut desc.genre, self.genre);
        set(&mut desc.codec, self.codec);
        set(&mut desc.resolution, self.resolution);
        if let Some(duration) = self.duration.filter(|d| !d.is_zero()) {
            desc.duration = duration;
        }
        if let Some(bitrate) = self.bitrate_kbps.filter(|b| *b > 0) {
            desc.bitrate_kbps = bitrate;
        }
    }
}

/// The subset of `ffprobe -print_format json -show_format -show_streams` we read.
#[derive(Debug, Default, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u64>,
    height: Option<u64>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

fn kbps(bit_rate: Option<&str>) -> Option<u32> {
    bit_rate
        .and_then(|b| b.parse::<u64>().ok())
        .and_then(|bps| u32::try_from(bps / 1000).ok())
}

fn parse_ffprobe(output: FfprobeOutput) -> ProbeReport {
    let mut report = ProbeReport::default();
    let stream_of = |kind: &str| {
        output
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some(kind))
    };

    if let Some(video) = stream_of("video") {
        report.codec = video.codec_name.clone();
        if let (Some(w), Some(h)) = (video.width, video.height) {
            report.resolution = Some(format!("{w}x{h}"));
        }
    } else if let Some(audio) = stream_of("audio") {
        report.codec = audio.codec_name.clone();
        report.bitrate_kbps = kbps(audio.bit_rate.as_deref());
    }

    let Some(format) = output.format else {
        return report;
    };
    report.duration = format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|secs| *secs > 0.0)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok());
    if let Some(bitrate) = kbps(format.bit_rate.as_deref()) {
        report.bitrate_kbps.get_or_insert(bitrate);
    }

    let tag = |names: &[&str]| {
        format
            .tags
            .iter()
            .find(|(key, _)| names.iter().any(|n| key.eq_ignore_ascii_case(n)))
            .map(|(_, value)| value.clone())
    };
    report.title = tag(&["title"]);
    report.artist = tag(&["artist", "album_artist"]);
    report.album = tag(&["album"]);
    report.genre = tag(&["genre"]);
    report.year = tag(&["date", "year"]).map(|date| date.chars().take(4).collect());
    report
}

fn read_with_lofty(path: &Path) -> Result<ProbeReport, lofty::error::LoftyError> {
    let tagged_file = Probe::open(path)?.read()?;
    let properties = tagged_file.properties();

    let mut report = ProbeReport {
        duration: Some(properties.duration()),
        bitrate_kbps: properties.audio_bitrate(),
        ..ProbeReport::default()
    };

    if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        report.title = tag.title().map(|s| s.to_string());
        report.artist = tag.artist().map(|s| s.to_string());
        report.album = tag.album().map(|s| s.to_string());
        report.genre = tag.genre().map(|s| s.to_string());
        report.year = tag.year().map(|y| y.to_string());
    }
    Ok(report)
}

fn write_with_lofty(path: &Path, tags: &TagSet) -> Result<(), lofty::error::LoftyError> {
    let mut tagged_file = Probe::open(path)?.read()?;
    let tag_type = tagged_file.primary_tag_type();
    let mut tag = tagged_file
        .tag(tag_type)
        .cloned()
        .unwrap_or_else(|| Tag::new(tag_type));

    tag.set_title(tags.title.clone());
    if let Some(artist) = &tags.artist {
        tag.set_artist(artist.clone());
    }
    if let Some(album) = &tags.album {
        tag.set_album(album.clone());
    }
    if let Some(year) = tags.year.as_deref().and_then(|y| y.trim().parse::<u32>().ok()) {
        tag.set_year(year);
    }
    if let Some(genre) = &tags.genre {
        tag.set_genre(genre.clone());
    }
    if let Some(comment) = &tags.comment {
        tag.set_comment(comment.clone());
    }

    tagged_file.insert_tag(tag);
    tagged_file.save_to_path(path, WriteOptions::default())
}

/// `-metadata` pairs for ffmpeg, title first.
fn metadata_pairs(tags: &TagSet) -> Vec<(&'static str, String)> {
    let mut pairs = vec![("title", tags.title.clone())];
    let optional = [
        ("artist", &tags.artist),
        ("album", &tags.album),
        ("date", &tags.year),
        ("genre", &tags.genre),
        ("comment", &tags.comment),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            pairs.push((key, value.clone()));
        }
    }
    pairs
}

fn category_of(path: &Path) -> MediaCategory {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    MediaCategory::from_extension(split_extension(&name).1)
}

//=========================================================================================
// Port Implementations
//=========================================================================================

#[async_trait]
impl MetadataExtractor for MediaToolkit {
    async fn extract(&self, path: &Path) -> FileDescription {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut desc = FileDescription::new(&file_name);
        desc.size_bytes = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);

        if desc.category == MediaCategory::Document {
            return desc;
        }

        match self.probe_with_ffprobe(path).await {
            Ok(report) => report.apply(&mut desc),
            Err(e) => debug!(path = %path.display(), "ffprobe skipped: {}", e),
        }

        if desc.category == MediaCategory::Audio {
            let owned = path.to_path_buf();
            match tokio::task::spawn_blocking(move || read_with_lofty(&owned)).await {
                Ok(Ok(report)) => report.apply(&mut desc),
                Ok(Err(e)) => debug!(path = %path.display(), "tag read skipped: {}", e),
                Err(e) => warn!(path = %path.display(), "tag reader task failed: {}", e),
            }
        }

        desc
    }
}

#[async_trait]
impl MetadataWriter for MediaToolkit {
    async fn write_tags(&self, path: &Path, tags: &TagSet) -> PortResult<()> {
        match category_of(path) {
            MediaCategory::Audio => {
                let owned = path.to_path_buf();
                let tags = tags.clone();
                tokio::task::spawn_blocking(move || write_with_lofty(&owned, &tags))
                    .await
                    .map_err(|e| PortError::Unexpected(format!("tag writer task failed: {e}")))?
                    .map_err(|e| PortError::Unexpected(format!("failed to write tags: {e}")))
            }
            MediaCategory::Video => self.write_video_tags(path, tags).await,
            MediaCategory::Document => Ok(()),
        }
    }
}

#[async_trait]
impl ThumbnailExtractor for MediaToolkit {
    async fn extract_thumbnail(&self, video: &Path, out_dir: &Path) -> PortResult<PathBuf> {
        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let duration = match self.probe_with_ffprobe(video).await {
            Ok(report) => report.duration.unwrap_or_default(),
            Err(_) => Duration::ZERO,
        };
        let offset = if duration > Duration::ZERO && duration < THUMBNAIL_OFFSET {
            duration / 2
        } else if duration.is_zero() {
            Duration::ZERO
        } else {
            THUMBNAIL_OFFSET
        };

        let out = out_dir.join(format!("thumb_{}.jpg", Uuid::new_v4().simple()));
        let output = Command::new(&self.ffmpeg)
            .args(["-y", "-v", "error", "-ss"])
            .arg(format!("{:.3}", offset.as_secs_f64()))
            .arg("-i")
            .arg(video)
            .args(["-frames:v", "1", "-q:v", "2"])
            .arg(&out)
            .output()
            .await
            .map_err(|e| PortError::Unexpected(format!("failed to run ffmpeg: {e}")))?;

        let written = tokio::fs::metadata(&out).await.map(|m| m.len()).unwrap_or(0);
        if !output.status.success() || written == 0 {
            let _ = tokio::fs::remove_file(&out).await;
            return Err(PortError::Unexpected(format!(
                "no thumbnail produced ({})",
                output.status
            )));
        }
        Ok(out)
    }
}
