//! Playback controller.
//!
//! A single task owns every piece of player state. It is driven by a fixed
//! interval tick and by completion messages posted from the request and
//! buffer tasks it spawns, so nothing outside of it ever mutates the
//! timeline, the windows or the base list.

mod options;
mod state;

pub use options::ControllerOptions;
pub use state::{PlayerEvent, PlayerState};

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    clock::Clock,
    manifest::{ContentType, Manifest, OperationMode},
    net::{BaseManager, Download, Progress, Request, RequestOptions, RequestOutcome, Transport},
    selector::{BestRepresentation, RepresentationSelector},
    sink::{BufferSink, SinkOp, SinkQueue},
    timeline::{SegmentState, Timeline},
    window::{SegmentId, SegmentRequest, SegmentWindow, WindowAction, WindowContext},
    ByteRange, NagareError, NagareResult,
};

const MPD_MIME_TYPE: &str = "application/dash+xml";

enum Message {
    Manifest(RequestOutcome),
    Init(ContentType, RequestOutcome),
    Segment(ContentType, SegmentId, RequestOutcome),
    SinkDone {
        content_type: ContentType,
        op: SinkOp,
        result: NagareResult<()>,
    },
    ClockSynced {
        clock: Clock,
        result: NagareResult<()>,
    },
    RetryManifest,
}

/// Buffering state of one content type.
struct Source {
    content_type: ContentType,
    window: SegmentWindow,
    queue: SinkQueue,
    init: Option<Download>,
    /// Initialization segment last appended, or in flight.
    init_source: Option<(Url, Option<ByteRange>)>,
    initialised: bool,
    segment: Option<(SegmentId, Download)>,
    stalled: bool,
    finished: bool,
}

impl Source {
    fn new(content_type: ContentType) -> Self {
        Self {
            content_type,
            window: SegmentWindow::new(content_type),
            queue: SinkQueue::new(),
            init: None,
            init_source: None,
            initialised: false,
            segment: None,
            stalled: false,
            finished: false,
        }
    }

    /// Seconds of contiguous media buffered ahead of `position`, or ahead of
    /// the first queued segment before playback starts.
    fn lead(&self, position: Option<f64>) -> f64 {
        let from = position.or_else(|| {
            self.window
                .segments()
                .get(self.window.play_index())
                .map(|entry| entry.segment.start())
        });
        match (from, self.window.buffered_end()) {
            (Some(from), Some(end)) => (end - from).max(0.0),
            _ => 0.0,
        }
    }

    fn is_idle(&self) -> bool {
        self.segment.is_none() && self.init.is_none() && self.queue.is_idle()
    }

    fn abort(&mut self) {
        if let Some(download) = &mut self.init {
            download.abort();
        }
        if let Some((_, download)) = &mut self.segment {
            download.abort();
        }
        self.queue.clear();
    }
}

#[derive(Debug, Default)]
struct Playback {
    origin: f64,
    started_at: Option<Instant>,
}

impl Playback {
    fn position(&self, now: Instant) -> Option<f64> {
        self.started_at
            .map(|started_at| self.origin + now.duration_since(started_at).as_secs_f64())
    }
}

pub struct Controller {
    manifest_url: Url,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn BufferSink>,
    selector: Arc<dyn RepresentationSelector>,
    options: ControllerOptions,
    clock: Clock,
    bases: BaseManager,

    manifest: Option<Manifest>,
    /// First dynamic manifest, parked until the clock is synchronised.
    unsynced_manifest: Option<Manifest>,
    clock_synced: bool,
    timeline: Timeline,
    sources: Vec<Source>,
    state: PlayerState,
    playback: Playback,

    manifest_download: Option<Download>,
    manifest_failures: u32,
    retry_pending: bool,
    last_manifest_load: Option<Instant>,
    ended: bool,

    tasks: Vec<JoinHandle<()>>,
    sender: mpsc::UnboundedSender<Message>,
    receiver: Option<mpsc::UnboundedReceiver<Message>>,
    events: mpsc::UnboundedSender<PlayerEvent>,
    state_tx: watch::Sender<PlayerState>,
    cancel: CancellationToken,
}

impl Controller {
    pub fn new(
        manifest_url: Url,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn BufferSink>,
        options: ControllerOptions,
    ) -> (Self, mpsc::UnboundedReceiver<PlayerEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(PlayerState::Uninitialised);
        let bases = BaseManager::new(options.bases.clone(), options.base.clone());

        let controller = Self {
            manifest_url,
            transport,
            sink,
            selector: Arc::new(BestRepresentation),
            options,
            clock: Clock::new(),
            bases,

            manifest: None,
            unsynced_manifest: None,
            clock_synced: false,
            timeline: Timeline::new(),
            sources: Vec::new(),
            state: PlayerState::Uninitialised,
            playback: Playback::default(),

            manifest_download: None,
            manifest_failures: 0,
            retry_pending: false,
            last_manifest_load: None,
            ended: false,

            tasks: Vec::new(),
            sender,
            receiver: Some(receiver),
            events,
            state_tx,
            cancel: CancellationToken::new(),
        };
        (controller, events_rx)
    }

    pub fn with_selector(mut self, selector: Arc<dyn RepresentationSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_bases(mut self, bases: BaseManager) -> Self {
        self.bases = bases;
        self
    }

    /// Start the controller on the current runtime.
    pub fn spawn(self) -> ControllerHandle {
        let cancel = self.cancel.clone();
        let state = self.state_tx.subscribe();
        let task = tokio::spawn(self.run());
        ControllerHandle {
            cancel,
            task,
            state,
        }
    }

    async fn run(mut self) -> NagareResult<()> {
        let Some(mut receiver) = self.receiver.take() else {
            return Ok(());
        };
        let cancel = self.cancel.clone();
        let mut interval = tokio::time::interval(self.options.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(url = %self.manifest_url, "Controller started");
        let mut result = self.load_manifest().await;
        while result.is_ok() && !self.ended {
            result = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => self.tick().await,
                Some(message) = receiver.recv() => self.handle(message).await,
            };
        }

        self.shutdown();
        if let Err(e) = &result {
            tracing::error!(error = %e, "Controller stopped");
        }
        result
    }

    fn shutdown(&mut self) {
        if let Some(download) = &mut self.manifest_download {
            download.abort();
        }
        for source in &mut self.sources {
            source.abort();
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        tracing::debug!("Controller torn down");
    }

    fn emit(&self, event: PlayerEvent) {
        // nobody listening is fine
        let _ = self.events.send(event);
    }

    fn set_state(&mut self, state: PlayerState) {
        if state <= self.state {
            return;
        }
        tracing::info!(from = %self.state, to = %state, "Player state changed");
        self.state = state;
        self.state_tx.send_replace(state);
        self.emit(PlayerEvent::StateChanged(state));
    }

    fn spawn_request<F>(&mut self, request: Request, wrap: F)
    where
        F: FnOnce(RequestOutcome) -> Message + Send + 'static,
    {
        let transport = self.transport.clone();
        let sender = self.sender.clone();
        let task = tokio::spawn(async move {
            let outcome = request.run(transport).await;
            let _ = sender.send(wrap(outcome));
        });
        self.tasks.retain(|task| !task.is_finished());
        self.tasks.push(task);
    }

    fn request_options(&self, options: RequestOptions) -> RequestOptions {
        options.with_timeout(self.options.request_timeout())
    }

    fn live_edge(&self) -> Option<f64> {
        let manifest = self.manifest.as_ref()?;
        if !manifest.is_dynamic() {
            return None;
        }
        manifest
            .availability_start_time
            .map(|ast| self.clock.seconds_since(ast))
    }

    fn min_buffer_time(&self) -> f64 {
        self.options
            .min_buffer_time_secs
            .or_else(|| self.manifest.as_ref().map(|m| m.min_buffer_time))
            .unwrap_or(crate::manifest::DEFAULT_MIN_BUFFER_TIME)
    }

    async fn handle(&mut self, message: Message) -> NagareResult<()> {
        match message {
            Message::Manifest(outcome) => {
                let Some(download) = &mut self.manifest_download else {
                    return Ok(());
                };
                let progress = download.on_outcome(outcome, &mut self.bases, Instant::now());
                self.on_manifest_progress(progress).await?;
            }
            Message::ClockSynced { clock, result } => {
                self.clock_synced = true;
                match result {
                    Ok(()) => self.clock = clock,
                    Err(e) => tracing::warn!(error = %e, "Clock sync failed, using local time"),
                }
                if let Some(manifest) = self.unsynced_manifest.take() {
                    self.on_manifest(manifest).await?;
                }
            }
            Message::RetryManifest => {
                self.retry_pending = false;
                self.load_manifest().await?;
            }
            Message::Init(content_type, outcome) => {
                let Some(source) = self.sources.iter_mut().find(|s| s.content_type == content_type)
                else {
                    return Ok(());
                };
                let Some(download) = &mut source.init else {
                    return Ok(());
                };
                let progress = download.on_outcome(outcome, &mut self.bases, Instant::now());
                self.on_init_progress(content_type, progress);
            }
            Message::Segment(content_type, id, outcome) => {
                let Some(source) = self.sources.iter_mut().find(|s| s.content_type == content_type)
                else {
                    return Ok(());
                };
                let Some((current, download)) = &mut source.segment else {
                    return Ok(());
                };
                if *current != id {
                    return Ok(());
                }
                let progress = download.on_outcome(outcome, &mut self.bases, Instant::now());
                self.on_segment_progress(content_type, id, progress);
            }
            Message::SinkDone {
                content_type,
                op,
                result,
            } => self.on_sink_done(content_type, op, result),
        }
        self.pump_sinks();
        Ok(())
    }

    async fn tick(&mut self) -> NagareResult<()> {
        let now = Instant::now();
        self.bases.maybe_shuffle(now);

        let Some(manifest) = &self.manifest else {
            return Ok(());
        };
        if manifest.operation_mode() == OperationMode::SimpleLive {
            let due = match (self.last_manifest_load, manifest.minimum_update_period) {
                (Some(last), Some(period)) => {
                    now.duration_since(last) >= Duration::from_secs_f64(period.max(0.0))
                }
                _ => false,
            };
            if due {
                self.load_manifest().await?;
            }
        }

        if self.state < PlayerState::SourcesInitialised {
            self.pump_sinks();
            return Ok(());
        }

        let Some(manifest) = &self.manifest else {
            return Ok(());
        };
        let dynamic = manifest.is_dynamic();
        let ctx = WindowContext {
            timeline: &self.timeline,
            live_edge: self.live_edge(),
            time_shift_buffer_depth: manifest.time_shift_buffer_depth,
            suggested_presentation_delay: manifest.suggested_presentation_delay,
        };
        let min_buffer_time = self.min_buffer_time();
        let position = self.playback.position(now);

        let mut requests = Vec::new();
        let mut inits = Vec::new();
        let mut reload = false;
        for source in &mut self.sources {
            if let Some(position) = position {
                source.window.set_time(position);
            }
            for (start, end) in source.window.truncate(dynamic) {
                source.queue.push(SinkOp::Remove { start, end });
            }

            if source.stalled || source.segment.is_some() || source.init.is_some() {
                continue;
            }
            if source.lead(position) >= min_buffer_time {
                continue;
            }
            let action = source.window.download_next_segment(&ctx);
            source.finished = matches!(action, WindowAction::Finished);
            match action {
                WindowAction::Download(request) => {
                    let init = match ctx.timeline.initialization_at(source.content_type, request.start) {
                        Ok(init) => init,
                        Err(e) => {
                            tracing::warn!(content_type = %source.content_type, error = %e, "Can not resolve initialization");
                            source.init_source.clone()
                        }
                    };
                    if init.is_some() && init != source.init_source {
                        // the segment waits until the new initialization is appended
                        source.window.mark(request.id, SegmentState::Pending);
                        source.init_source.clone_from(&init);
                        if let Some((url, byte_range)) = init {
                            tracing::info!(content_type = %source.content_type, %url, "Initialization changed");
                            inits.push((source.content_type, url, byte_range));
                        }
                    } else {
                        requests.push((source.content_type, request));
                    }
                }
                WindowAction::ReloadManifest => reload = true,
                WindowAction::Wait | WindowAction::Finished => {}
            }
        }

        for (content_type, url, byte_range) in inits {
            self.start_init(content_type, url, byte_range);
        }
        for (content_type, request) in requests {
            self.start_segment(content_type, request);
        }
        let reload_allowed = self
            .last_manifest_load
            .map_or(true, |last| now.duration_since(last) >= self.options.manifest_retry_delay());
        if reload && reload_allowed {
            tracing::debug!("Segment queue exhausted, reloading manifest early");
            self.load_manifest().await?;
        }

        if self.state == PlayerState::SourcesInitialised {
            let ready = self.sources.iter().all(|source| {
                source.window.buffered_end().is_some()
                    && (source.finished || source.lead(None) >= min_buffer_time)
            });
            if ready {
                self.start_playback(now);
            }
        }

        if !self.ended
            && !dynamic
            && self.state == PlayerState::BufferAvailable
            && self
                .sources
                .iter()
                .all(|source| source.finished && source.is_idle())
        {
            tracing::info!("All segments buffered");
            self.ended = true;
            self.emit(PlayerEvent::Ended);
        }

        self.pump_sinks();
        Ok(())
    }

    fn start_playback(&mut self, now: Instant) {
        let origin = self
            .sources
            .iter()
            .filter_map(|source| source.window.buffer_start())
            .reduce(f64::max)
            .unwrap_or(0.0);
        self.playback = Playback {
            origin,
            started_at: Some(now),
        };
        for source in &mut self.sources {
            source.window.set_time(origin);
        }
        tracing::info!(position = origin, "Playback started");
        self.set_state(PlayerState::BufferAvailable);
        self.emit(PlayerEvent::Playing { position: origin });
    }

    async fn load_manifest(&mut self) -> NagareResult<()> {
        if self.manifest_download.is_some() || self.retry_pending || self.unsynced_manifest.is_some()
        {
            return Ok(());
        }
        let options = self.request_options(RequestOptions::default().with_mime_type(MPD_MIME_TYPE));
        let mut download = Download::new(self.manifest_url.clone(), options);
        let progress = download.perform(&mut self.bases, Instant::now());
        self.manifest_download = Some(download);
        self.on_manifest_progress(progress).await
    }

    async fn on_manifest_progress(&mut self, progress: Progress) -> NagareResult<()> {
        match progress {
            Progress::Start(request) => {
                self.spawn_request(request, Message::Manifest);
                Ok(())
            }
            Progress::Done(Ok(response)) => {
                self.manifest_download = None;
                let text = String::from_utf8_lossy(&response.body);
                match Manifest::parse(&text, &self.manifest_url) {
                    Ok(manifest) => self.on_manifest(manifest).await,
                    Err(e) => self.manifest_failed(e.to_string()),
                }
            }
            Progress::Done(Err(e)) => {
                self.manifest_download = None;
                self.manifest_failed(e.to_string())
            }
            Progress::Ignored => Ok(()),
        }
    }

    fn manifest_failed(&mut self, reason: String) -> NagareResult<()> {
        self.manifest_failures += 1;
        tracing::warn!(attempt = self.manifest_failures, %reason, "Manifest load failed");

        if self.manifest_failures <= self.options.manifest_retries {
            self.retry_pending = true;
            let delay = self.options.manifest_retry_delay();
            let sender = self.sender.clone();
            self.tasks.push(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = sender.send(Message::RetryManifest);
            }));
            return Ok(());
        }

        let attempts = self.manifest_failures;
        self.manifest_failures = 0;
        if self.manifest.is_none() {
            return Err(NagareError::ManifestUnavailable(attempts));
        }
        // try again on the next scheduled reload
        self.last_manifest_load = Some(Instant::now());
        self.emit(PlayerEvent::Warning(format!(
            "Manifest reload failed {attempts} times, keeping the previous manifest: {reason}"
        )));
        Ok(())
    }

    async fn on_manifest(&mut self, manifest: Manifest) -> NagareResult<()> {
        self.manifest_failures = 0;
        self.last_manifest_load = Some(Instant::now());
        self.bases.set_manifest_loaded();

        let first = self.manifest.is_none();
        if first
            && manifest.is_dynamic()
            && self.options.sync_clock
            && !manifest.utc_timing.is_empty()
            && !self.clock_synced
        {
            self.start_clock_sync(&manifest);
            self.unsynced_manifest = Some(manifest);
            return Ok(());
        }

        if let Err(e) = self.timeline.update(&manifest, self.selector.as_ref()) {
            if first {
                return Err(e);
            }
            tracing::error!(error = %e, "Manifest reload rejected");
            self.emit(PlayerEvent::Warning(format!("Manifest reload rejected: {e}")));
            return Ok(());
        }
        tracing::debug!(
            mode = ?manifest.operation_mode(),
            periods = manifest.periods().count(),
            "Manifest loaded"
        );
        self.manifest = Some(manifest);
        self.emit(PlayerEvent::ManifestLoaded { reload: !first });

        if first {
            self.set_state(PlayerState::FirstMpdLoaded);
            self.create_sources().await?;
        }
        self.update_windows();
        Ok(())
    }

    fn start_clock_sync(&mut self, manifest: &Manifest) {
        let mut clock = self.clock.clone();
        let timing = manifest.utc_timing.clone();
        let transport = self.transport.clone();
        let options = self.request_options(RequestOptions::default());
        let sender = self.sender.clone();
        tracing::debug!(sources = timing.len(), "Synchronising clock");
        self.tasks.push(tokio::spawn(async move {
            let result = clock.sync(&timing, transport.as_ref(), &options).await;
            let _ = sender.send(Message::ClockSynced { clock, result });
        }));
    }

    async fn create_sources(&mut self) -> NagareResult<()> {
        let Some(manifest) = &self.manifest else {
            return Ok(());
        };
        let time = self.live_edge().unwrap_or_else(|| self.timeline.start());
        let Some(interval) = self.timeline.interval_at(time) else {
            return Err(NagareError::NoPlayableContent);
        };

        let mut pending = Vec::new();
        for content in interval.contents() {
            let representation = manifest.representation(content.representation());
            pending.push((
                content.content_type,
                representation.mime_type.clone(),
                representation.codecs.clone(),
                content.initialization()?,
            ));
        }
        if pending.is_empty() {
            return Err(NagareError::NoPlayableContent);
        }

        for (content_type, mime_type, codecs, _) in &pending {
            self.sink
                .create(*content_type, mime_type.as_deref(), codecs.as_deref())
                .await?;
            tracing::info!(%content_type, mime_type = ?mime_type, codecs = ?codecs, "Source buffer created");
            self.sources.push(Source::new(*content_type));
        }
        self.set_state(PlayerState::SourceBuffersCreated);

        for (content_type, _, _, initialization) in pending {
            match initialization {
                Some((url, byte_range)) => {
                    if let Some(source) = self.source_mut(content_type) {
                        source.init_source = Some((url.clone(), byte_range));
                    }
                    self.start_init(content_type, url, byte_range)
                }
                None => {
                    if let Some(source) = self.source_mut(content_type) {
                        source.initialised = true;
                    }
                }
            }
        }
        self.check_initialised();
        Ok(())
    }

    fn update_windows(&mut self) {
        let Some(manifest) = &self.manifest else {
            return;
        };
        let ctx = WindowContext {
            timeline: &self.timeline,
            live_edge: self.live_edge(),
            time_shift_buffer_depth: manifest.time_shift_buffer_depth,
            suggested_presentation_delay: manifest.suggested_presentation_delay,
        };
        for source in &mut self.sources {
            source.window.update(&ctx);
        }
    }

    fn source_mut(&mut self, content_type: ContentType) -> Option<&mut Source> {
        self.sources
            .iter_mut()
            .find(|source| source.content_type == content_type)
    }

    fn check_initialised(&mut self) {
        if self.state == PlayerState::SourceBuffersCreated
            && self.sources.iter().all(|source| source.initialised)
        {
            self.set_state(PlayerState::SourcesInitialised);
        }
    }

    fn start_init(&mut self, content_type: ContentType, url: Url, byte_range: Option<ByteRange>) {
        let options = self.request_options(RequestOptions::default().with_byte_range(byte_range));
        let mut download = Download::new(url, options);
        let progress = download.perform(&mut self.bases, Instant::now());
        if let Some(source) = self.source_mut(content_type) {
            source.init = Some(download);
        }
        self.on_init_progress(content_type, progress);
    }

    fn on_init_progress(&mut self, content_type: ContentType, progress: Progress) {
        match progress {
            Progress::Start(request) => {
                self.spawn_request(request, move |outcome| Message::Init(content_type, outcome))
            }
            Progress::Done(result) => {
                let Some(source) = self.source_mut(content_type) else {
                    return;
                };
                source.init = None;
                match result {
                    Ok(response) => source.queue.push(SinkOp::Append {
                        segment: None,
                        data: response.body,
                    }),
                    Err(e) => self.stall(content_type, format!("Initialization failed: {e}")),
                }
            }
            Progress::Ignored => {}
        }
    }

    fn start_segment(&mut self, content_type: ContentType, request: SegmentRequest) {
        let options =
            self.request_options(RequestOptions::default().with_byte_range(request.byte_range));
        let mut download = Download::new(request.url, options);
        let progress = download.perform(&mut self.bases, Instant::now());
        if let Some(source) = self.source_mut(content_type) {
            source.segment = Some((request.id, download));
        }
        self.on_segment_progress(content_type, request.id, progress);
    }

    fn on_segment_progress(&mut self, content_type: ContentType, id: SegmentId, progress: Progress) {
        match progress {
            Progress::Start(request) => self.spawn_request(request, move |outcome| {
                Message::Segment(content_type, id, outcome)
            }),
            Progress::Done(result) => {
                let Some(source) = self.source_mut(content_type) else {
                    return;
                };
                let download = source.segment.take();
                match result {
                    Ok(response) => {
                        if let Some(timing) = download
                            .as_ref()
                            .and_then(|(_, download)| download.requests().last())
                        {
                            tracing::debug!(
                                %content_type,
                                bytes = timing.bytes,
                                latency = ?timing.latency(),
                                speed = ?timing.speed(),
                                "Segment downloaded"
                            );
                        }
                        source.queue.push(SinkOp::Append {
                            segment: Some(id),
                            data: response.body,
                        });
                    }
                    Err(e) => {
                        source.window.mark(id, SegmentState::Error);
                        self.segment_failed(content_type, e.to_string());
                    }
                }
            }
            Progress::Ignored => {}
        }
    }

    fn segment_failed(&mut self, content_type: ContentType, reason: String) {
        if self.options.skip_failed_segments {
            tracing::warn!(%content_type, %reason, "Skipping failed segment");
            self.emit(PlayerEvent::Warning(reason));
        } else {
            self.stall(content_type, reason);
        }
    }

    fn stall(&mut self, content_type: ContentType, reason: String) {
        tracing::error!(%content_type, %reason, "Source stalled");
        if let Some(source) = self.source_mut(content_type) {
            source.stalled = true;
        }
        self.emit(PlayerEvent::Stalled {
            content_type,
            reason,
        });
    }

    fn pump_sinks(&mut self) {
        for source in &mut self.sources {
            let Some(op) = source.queue.next() else {
                continue;
            };
            let sink = self.sink.clone();
            let sender = self.sender.clone();
            let content_type = source.content_type;
            self.tasks.push(tokio::spawn(async move {
                let result = op.clone().apply(sink.as_ref(), content_type).await;
                let _ = sender.send(Message::SinkDone {
                    content_type,
                    op,
                    result,
                });
            }));
        }
    }

    fn on_sink_done(&mut self, content_type: ContentType, op: SinkOp, result: NagareResult<()>) {
        let Some(source) = self.source_mut(content_type) else {
            return;
        };
        source.queue.done();

        match (op, result) {
            (SinkOp::Append { segment: None, .. }, Ok(())) => {
                source.initialised = true;
                tracing::debug!(%content_type, "Initialization appended");
                self.check_initialised();
            }
            (SinkOp::Append { segment: None, .. }, Err(e)) => {
                self.stall(content_type, format!("Initialization rejected by sink: {e}"));
            }
            (SinkOp::Append { segment: Some(id), .. }, Ok(())) => {
                source.window.mark(id, SegmentState::Downloaded);
                let bounds = source.window.segment(id).map(|s| (s.start(), s.end()));
                if let Some((start, end)) = bounds {
                    tracing::trace!(%content_type, start, end, "Segment appended");
                    self.emit(PlayerEvent::SegmentAppended {
                        content_type,
                        start,
                        end,
                    });
                }
            }
            (SinkOp::Append { segment: Some(id), .. }, Err(e)) => {
                source.window.mark(id, SegmentState::Error);
                self.segment_failed(content_type, format!("Segment rejected by sink: {e}"));
            }
            (SinkOp::Remove { .. }, Ok(())) => {}
            (SinkOp::Remove { start, end }, Err(e)) => {
                tracing::warn!(%content_type, start, end, error = %e, "Buffer removal failed");
            }
        }
    }
}

/// Handle to a running [`Controller`].
pub struct ControllerHandle {
    cancel: CancellationToken,
    task: JoinHandle<NagareResult<()>>,
    state: watch::Receiver<PlayerState>,
}

impl ControllerHandle {
    pub fn state(&self) -> PlayerState {
        *self.state.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<PlayerState> {
        self.state.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the controller to stop on its own.
    pub async fn wait(self) -> NagareResult<()> {
        self.task.await?
    }

    /// Stop the controller. In-flight requests are dropped without
    /// reporting an error.
    pub async fn destruct(self) -> NagareResult<()> {
        self.cancel.cancel();
        self.wait().await
    }
}
