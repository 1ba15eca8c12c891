//! services/bot/src/chat/job_task.rs
//!
//! The per-file job: download, inspect, name, rename, enrich, record.
//!
//! Stages run strictly in order and a failing stage ends the job. Enrichment
//! (tags, thumbnail) and bookkeeping (history) are best-effort: their failures are
//! logged and the job still succeeds, because the correctly named file is the
//! deliverable. Progress goes out through a fire-and-forget [`ProgressSink`].

use crate::chat::state::AppState;
use renamer_core::domain::{
    FileRef, HistoryRecord, JobFailure, JobResult, MediaCategory, RenamedFile, TagSet, UserId,
};
use renamer_core::naming::{
    collision_name, compose, finalize_name, sanitize_filename, unknown_placeholders,
};
use renamer_core::ports::{ChatTransport, MessageHandle};
use renamer_core::progress::{JobEvent, JobStage, ProgressSink};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::fs::{self, OpenOptions};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Where the new name comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamingSource {
    /// Render the user's saved template against the extracted description.
    Template(String),
    /// A name the user typed. Sanitized and extension-normalized all the same.
    Explicit(String),
}

#[derive(Debug, Clone)]
pub struct JobRequest {
    pub job_id: Uuid,
    pub user_id: UserId,
    pub file: FileRef,
    /// Validated original name of the upload.
    pub file_name: String,
    pub naming: NamingSource,
    pub write_tags: bool,
    pub extract_thumbnail: bool,
}

//=========================================================================================
// FileJobPipeline
//=========================================================================================

pub struct FileJobPipeline {
    state: Arc<AppState>,
}

impl FileJobPipeline {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Runs the job on its own task so a panic inside a stage becomes a failed
    /// result instead of tearing down the caller.
    pub async fn run_isolated(self: Arc<Self>, request: JobRequest, progress: ProgressSink) -> JobResult {
        let job_id = request.job_id;
        let original_name = request.file_name.clone();
        let size_bytes = request.file.declared_size;
        let started = Instant::now();
        let job_dir = self.job_dir(job_id);

        let task = tokio::spawn(async move { self.run(&request, &progress).await });
        match task.await {
            Ok(result) => result,
            Err(e) => {
                error!(%job_id, "File job aborted: {}", e);
                let _ = fs::remove_dir_all(&job_dir).await;
                JobResult {
                    job_id,
                    original_name,
                    size_bytes,
                    elapsed: started.elapsed(),
                    outcome: Err(JobFailure::Unexpected(e.to_string())),
                }
            }
        }
    }

    fn job_dir(&self, job_id: Uuid) -> PathBuf {
        self.state.config.download_dir.join(job_id.simple().to_string())
    }

    pub async fn run(&self, request: &JobRequest, progress: &ProgressSink) -> JobResult {
        let started = Instant::now();
        let job_dir = self.job_dir(request.job_id);
        info!(job_id = %request.job_id, user_id = request.user_id, "Starting file job for '{}'", request.file_name);

        let mut size_bytes = request.file.declared_size;
        let outcome = self
            .execute(request, &job_dir, progress, started, &mut size_bytes)
            .await;

        if let Err(e) = fs::remove_dir_all(&job_dir).await {
            if e.kind() != ErrorKind::NotFound {
                debug!(job_id = %request.job_id, "Could not remove job directory: {}", e);
            }
        }

        match &outcome {
            Ok(renamed) => info!(job_id = %request.job_id, "File job finished as '{}'", renamed.file_name),
            Err(failure) => warn!(job_id = %request.job_id, "File job failed: {}", failure),
        }

        JobResult {
            job_id: request.job_id,
            original_name: request.file_name.clone(),
            size_bytes,
            elapsed: started.elapsed(),
            outcome,
        }
    }

    async fn execute(
        &self,
        request: &JobRequest,
        job_dir: &Path,
        progress: &ProgressSink,
        started: Instant,
        size_bytes: &mut u64,
    ) -> Result<RenamedFile, JobFailure> {
        let state = &self.state;

        // --- 1. Download into a private directory ---
        progress.emit(JobEvent::Stage(JobStage::Downloading));
        fs::create_dir_all(job_dir)
            .await
            .map_err(|e| JobFailure::Download(e.to_string()))?;
        let staged = job_dir.join(sanitize_filename(&request.file_name));
        let received = state
            .transport
            .download_to_path(&request.file, &staged, progress)
            .await
            .map_err(|e| JobFailure::Download(e.to_string()))?;
        *size_bytes = received;

        // --- 2. Inspect ---
        progress.emit(JobEvent::Stage(JobStage::Inspecting));
        let mut description = state.extractor.extract(&staged).await;
        if description.size_bytes == 0 {
            description.size_bytes = received;
        }

        // --- 3. Compose the new name ---
        progress.emit(JobEvent::Stage(JobStage::Composing));
        let new_name = match &request.naming {
            NamingSource::Template(template) => {
                let unknown = unknown_placeholders(template);
                if !unknown.is_empty() {
                    warn!(job_id = %request.job_id, "Stored template has unknown placeholders: {}", unknown.join(", "));
                }
                compose(template, &description)
            }
            NamingSource::Explicit(name) => finalize_name(name, &description.extension),
        };

        // --- 4. Rename without overwriting anything ---
        progress.emit(JobEvent::Stage(JobStage::Renaming));
        let (target, file_name) = reserve_unique_path(&state.config.download_dir, &new_name)
            .await
            .map_err(|e| JobFailure::Rename(e.to_string()))?;
        if let Err(e) = fs::rename(&staged, &target).await {
            let _ = fs::remove_file(&target).await;
            return Err(JobFailure::Rename(e.to_string()));
        }

        // --- 5. Enrich (best-effort) ---
        let category = description.category;
        let wants_tags = request.write_tags && category != MediaCategory::Document;
        let wants_thumbnail = request.extract_thumbnail && category == MediaCategory::Video;
        let mut thumbnail = None;
        if wants_tags || wants_thumbnail {
            progress.emit(JobEvent::Stage(JobStage::Tagging));
        }
        if wants_tags {
            let tags = TagSet::from_description(&description);
            if let Err(e) = state.writer.write_tags(&target, &tags).await {
                warn!(job_id = %request.job_id, "Writing metadata failed, keeping file as is: {}", e);
            }
        }
        if wants_thumbnail {
            thumbnail = self.extract_thumbnail(request.job_id, &target).await;
        }

        // --- 6. Record (best-effort) ---
        progress.emit(JobEvent::Stage(JobStage::Recording));
        let record = HistoryRecord {
            job_id: request.job_id,
            user_id: request.user_id,
            original_name: request.file_name.clone(),
            new_name: file_name.clone(),
            file_size: received,
            file_type: category,
            processing_time: started.elapsed(),
            processed_at: state.clock.now(),
        };
        if let Err(e) = state.storage.append_history(&record).await {
            warn!(job_id = %request.job_id, "Failed to record history: {}", e);
        }

        Ok(RenamedFile {
            path: target,
            file_name,
            category,
            thumbnail,
        })
    }

    async fn extract_thumbnail(&self, job_id: Uuid, video: &Path) -> Option<PathBuf> {
        let temp_dir = &self.state.config.temp_dir;
        if let Err(e) = fs::create_dir_all(temp_dir).await {
            warn!(%job_id, "Cannot create temp directory for thumbnail: {}", e);
            return None;
        }
        match self.state.thumbnails.extract_thumbnail(video, temp_dir).await {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(%job_id, "Thumbnail extraction failed: {}", e);
                None
            }
        }
    }
}

/// Claims `name` in `dir`, or the first free `stem_n.ext` variant.
///
/// The claim is an empty file created exclusively, so two jobs racing for the same
/// name never end up with the same path.
async fn reserve_unique_path(dir: &Path, name: &str) -> std::io::Result<(PathBuf, String)> {
    fs::create_dir_all(dir).await?;
    let mut attempt: u32 = 0;
    loop {
        let candidate = if attempt == 0 {
            name.to_string()
        } else {
            collision_name(name, attempt)
        };
        let path = dir.join(&candidate);
        match OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(_) => return Ok((path, candidate)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e),
        }
    }
}

//=========================================================================================
// Progress Reporting
//=========================================================================================

fn progress_bar(percent: u8) -> String {
    let filled = usize::from(percent.min(100) / 10);
    format!("[{}{}]", "█".repeat(filled), "░".repeat(10 - filled))
}

pub fn render_progress(event: &JobEvent) -> String {
    match event {
        JobEvent::Download { percent } => {
            format!("📥 Downloading...\n{} {}%", progress_bar(*percent), percent)
        }
        JobEvent::Stage(JobStage::Downloading) => "📥 Downloading...".to_string(),
        JobEvent::Stage(stage) => format!("⚙️ {}...", stage.label()),
    }
}

/// Mirrors job events onto a status message until the job drops its sink.
/// Edit failures never reach the job.
pub fn spawn_progress_reporter(
    transport: Arc<dyn ChatTransport>,
    handle: MessageHandle,
    mut events: UnboundedReceiver<JobEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = String::new();
        while let Some(event) = events.recv().await {
            let text = render_progress(&event);
            if text == last {
                continue;
            }
            if let Err(e) = transport.edit_text(handle, &text).await {
                debug!("Progress update skipped: {}", e);
            }
            last = text;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::testing::{build_state, TestRig};
    use renamer_core::domain::UploadKind;
    use tempfile::TempDir;

    fn request(file_name: &str, naming: NamingSource) -> JobRequest {
        JobRequest {
            job_id: Uuid::new_v4(),
            user_id: 42,
            file: FileRef {
                file_id: "remote-1".to_string(),
                file_name: Some(file_name.to_string()),
                declared_size: 7,
                kind: UploadKind::Document,
            },
            file_name: file_name.to_string(),
            naming,
            write_tags: true,
            extract_thumbnail: true,
        }
    }

    fn setup() -> (TempDir, TestRig, FileJobPipeline) {
        let dir = TempDir::new().unwrap();
        let rig = build_state(dir.path());
        let pipeline = FileJobPipeline::new(rig.state.clone());
        (dir, rig, pipeline)
    }

    #[tokio::test]
    async fn template_job_renames_tags_and_records() {
        let (_dir, rig, pipeline) = setup();
        let req = request("Song.mp3", NamingSource::Template("{title} - {artist}".to_string()));

        let result = pipeline.run(&req, &ProgressSink::disabled()).await;
        let renamed = result.outcome.clone().unwrap();

        assert_eq!(renamed.file_name, "Song - Unknown Artist.mp3");
        assert_eq!(renamed.category, MediaCategory::Audio);
        assert_eq!(renamed.path, rig.state.config.download_dir.join("Song - Unknown Artist.mp3"));
        assert_eq!(std::fs::read(&renamed.path).unwrap(), b"payload");
        assert_eq!(result.size_bytes, 7);
        assert!(!rig.state.config.download_dir.join(req.job_id.simple().to_string()).exists());

        let tagged = rig.media.tagged();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].1.title, "Song");
        assert_eq!(tagged[0].1.artist, None);

        let history = rig.storage.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].original_name, "Song.mp3");
        assert_eq!(history[0].new_name, "Song - Unknown Artist.mp3");
        assert_eq!(history[0].file_type, MediaCategory::Audio);
    }

    #[tokio::test]
    async fn collisions_get_numeric_suffixes() {
        let (_dir, rig, pipeline) = setup();
        let downloads = &rig.state.config.download_dir;
        std::fs::create_dir_all(downloads).unwrap();
        std::fs::write(downloads.join("movie.mp4"), b"existing").unwrap();

        let first = pipeline
            .run(&request("clip.mp4", NamingSource::Explicit("movie".to_string())), &ProgressSink::disabled())
            .await;
        let second = pipeline
            .run(&request("clip.mp4", NamingSource::Explicit("movie.mp4".to_string())), &ProgressSink::disabled())
            .await;

        assert_eq!(first.outcome.unwrap().file_name, "movie_1.mp4");
        assert_eq!(second.outcome.unwrap().file_name, "movie_2.mp4");
        assert_eq!(std::fs::read(downloads.join("movie.mp4")).unwrap(), b"existing");
        assert_eq!(std::fs::read(downloads.join("movie_2.mp4")).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn tag_failure_still_succeeds_with_file_in_place() {
        let (_dir, rig, pipeline) = setup();
        rig.media.set_failing_tags(true);

        let result = pipeline
            .run(&request("track.flac", NamingSource::Template("{title}".to_string())), &ProgressSink::disabled())
            .await;

        assert!(result.is_success());
        let renamed = result.outcome.unwrap();
        assert_eq!(renamed.file_name, "track.flac");
        assert!(renamed.path.exists());
    }

    #[tokio::test]
    async fn history_failure_is_not_reported() {
        let (_dir, rig, pipeline) = setup();
        rig.storage.set_history_failing(true);

        let result = pipeline
            .run(&request("notes.pdf", NamingSource::Explicit("Report".to_string())), &ProgressSink::disabled())
            .await;

        assert_eq!(result.outcome.unwrap().file_name, "Report.pdf");
        assert!(rig.storage.history().is_empty());
        assert!(rig.media.tagged().is_empty());
    }

    #[tokio::test]
    async fn download_failure_short_circuits() {
        let (_dir, rig, pipeline) = setup();
        rig.transport.set_failing_downloads(true);
        let req = request("Song.mp3", NamingSource::Template("{title}".to_string()));

        let result = pipeline.run(&req, &ProgressSink::disabled()).await;

        assert!(matches!(result.outcome, Err(JobFailure::Download(_))));
        assert_eq!(result.size_bytes, 7);
        assert!(rig.storage.history().is_empty());
        assert!(!rig.state.config.download_dir.join(req.job_id.simple().to_string()).exists());
    }

    #[tokio::test]
    async fn video_jobs_extract_a_thumbnail() {
        let (_dir, rig, pipeline) = setup();
        let result = pipeline
            .run(&request("holiday.mkv", NamingSource::Template("{title} {video}".to_string())), &ProgressSink::disabled())
            .await;

        let renamed = result.outcome.unwrap();
        assert_eq!(renamed.file_name, "holiday.mkv");
        let thumbnail = renamed.thumbnail.unwrap();
        assert!(thumbnail.starts_with(&rig.state.config.temp_dir));
        assert!(thumbnail.exists());
    }

    #[tokio::test]
    async fn stages_are_reported_in_order() {
        let (_dir, _rig, pipeline) = setup();
        let (sink, mut rx) = ProgressSink::channel();

        let result = pipeline
            .run(&request("Song.mp3", NamingSource::Template("{title}".to_string())), &sink)
            .await;
        assert!(result.is_success());
        drop(sink);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                JobEvent::Stage(JobStage::Downloading),
                JobEvent::Download { percent: 100 },
                JobEvent::Stage(JobStage::Inspecting),
                JobEvent::Stage(JobStage::Composing),
                JobEvent::Stage(JobStage::Renaming),
                JobEvent::Stage(JobStage::Tagging),
                JobEvent::Stage(JobStage::Recording),
            ]
        );
    }

    #[tokio::test]
    async fn reporter_swallows_edit_failures_and_skips_duplicates() {
        let (_dir, rig, _pipeline) = setup();
        let handle = MessageHandle {
            chat_id: 42,
            message_id: 9,
        };
        let (sink, rx) = ProgressSink::channel();
        let reporter = spawn_progress_reporter(rig.transport.clone(), handle, rx);

        sink.emit(JobEvent::Download { percent: 5 });
        sink.emit(JobEvent::Download { percent: 5 });
        sink.emit(JobEvent::Stage(JobStage::Renaming));
        drop(sink);
        reporter.await.unwrap();

        assert_eq!(
            rig.transport.texts_to(42),
            vec![
                "📥 Downloading...\n[░░░░░░░░░░] 5%".to_string(),
                "⚙️ Renaming...".to_string(),
            ]
        );

        rig.transport.set_failing_edits(true);
        let (sink, rx) = ProgressSink::channel();
        let reporter = spawn_progress_reporter(rig.transport.clone(), handle, rx);
        sink.emit(JobEvent::Stage(JobStage::Tagging));
        drop(sink);
        reporter.await.unwrap();
    }

    #[tokio::test]
    async fn isolated_run_returns_the_result() {
        let (_dir, _rig, pipeline) = setup();
        let pipeline = Arc::new(pipeline);
        let req = request("a.txt", NamingSource::Explicit("b".to_string()));

        let result = pipeline.run_isolated(req, ProgressSink::disabled()).await;
        assert_eq!(result.outcome.unwrap().file_name, "b.txt");
    }

    #[tokio::test]
    async fn long_multibyte_names_fit_the_filesystem() {
        let (_dir, rig, pipeline) = setup();
        let req = request("a.txt", NamingSource::Explicit("日".repeat(100)));

        let result = pipeline.run(&req, &ProgressSink::disabled()).await;
        let renamed = result.outcome.unwrap();

        assert_eq!(renamed.file_name, format!("{}.txt", "日".repeat(66)));
        assert!(renamed.file_name.len() <= 255);
        assert_eq!(renamed.path, rig.state.config.download_dir.join(&renamed.file_name));
        assert!(renamed.path.exists());
    }

    #[tokio::test]
    async fn panicking_stage_becomes_an_unexpected_failure() {
        let (_dir, rig, pipeline) = setup();
        rig.media.set_panicking(true);
        let pipeline = Arc::new(pipeline);
        let req = request("Song.mp3", NamingSource::Explicit("Renamed".to_string()));
        let job_id = req.job_id;

        let result = pipeline.run_isolated(req, ProgressSink::disabled()).await;

        assert_eq!(result.job_id, job_id);
        assert_eq!(result.original_name, "Song.mp3");
        match result.outcome {
            Err(JobFailure::Unexpected(message)) => assert!(message.contains("panic"), "{message}"),
            other => panic!("expected an unexpected failure, got {other:?}"),
        }
        let download_dir = &rig.state.config.download_dir;
        assert!(!download_dir.join(job_id.simple().to_string()).exists());
        assert!(!download_dir.join("Renamed.mp3").exists());
    }
}
