pub mod domain;
pub mod naming;
pub mod ports;
pub mod progress;

pub use domain::{
    ChatId, DumpDestination, FileDescription, FileRef, GlobalStats, HistoryRecord, HistoryStats,
    JobFailure, JobResult, LeaderboardEntry, MediaCategory, MediaType, RateLimitWindow,
    RenameMode, RenamedFile, TagSet, UploadKind, UserId, UserProfile, UserSettings,
};
pub use naming::{compose, finalize_name, sanitize_filename, Template, TemplateError, TemplateField};
pub use ports::{
    Artifact, ChatTransport, Clock, Keyboard, MessageHandle, MetadataExtractor, MetadataWriter,
    PortError, PortResult, StorageService, SystemClock, ThumbnailExtractor,
};
pub use progress::{
    BroadcastProgress, DownloadMeter, EventSink, JobEvent, JobStage, ProgressSink,
};
