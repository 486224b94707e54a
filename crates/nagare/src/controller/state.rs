use crate::manifest::ContentType;

/// Player lifecycle. States only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum PlayerState {
    #[default]
    Uninitialised,
    FirstMpdLoaded,
    SourceBuffersCreated,
    SourcesInitialised,
    BufferAvailable,
}

impl std::fmt::Display for PlayerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Uninitialised => "uninitialised",
            Self::FirstMpdLoaded => "first_mpd_loaded",
            Self::SourceBuffersCreated => "source_buffers_created",
            Self::SourcesInitialised => "sources_initialised",
            Self::BufferAvailable => "buffer_available",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    StateChanged(PlayerState),
    /// A manifest was loaded and merged into the timeline.
    ManifestLoaded { reload: bool },
    SegmentAppended {
        content_type: ContentType,
        start: f64,
        end: f64,
    },
    /// Playback started at `position` seconds.
    Playing { position: f64 },
    Warning(String),
    /// A source stopped loading after an unrecoverable error.
    Stalled {
        content_type: ContentType,
        reason: String,
    },
    /// Every segment of a finite presentation reached the buffer.
    Ended,
}
