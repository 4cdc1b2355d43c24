//! Session player.
//!
//! [`Player`] is the replay state machine. It rehydrates the root snapshot into
//! a [`MountSurface`] and applies records in id order, pacing them by their
//! timestamps. Like the recorder core it never reads a clock: every call that
//! schedules work takes `now` in milliseconds and the caller runs
//! [`Player::tick`] once [`Player::next_deadline`] has passed.
//! [`PlayerHandle`] does exactly that on a tokio task.

mod handle;
mod interpret;
mod overlay;
mod rehydrate;
mod stage;
mod surface;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::dom::{Document, NodeKey};
use crate::model::{pct, HighlightEntry, SessionResult};
use crate::resource::ResourceNormalizer;
use crate::transport::{SessionSource, TransportError};

pub use handle::{PlayerCommand, PlayerHandle, PlayerStatus};
pub use interpret::{Effect, Interpreter};
pub use overlay::{Expired, Overlay};
pub use rehydrate::{instantiate, mount, unmount};
pub use stage::{ParentRef, Stage};
pub use surface::{MemorySurface, MountSurface};

pub const MIN_SPEED: u32 = 1;
pub const MAX_SPEED: u32 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerOptions {
    pub speed: u32,
    /// Longest pause kept between two records; longer gaps are skipped.
    pub fast_forward_threshold_ms: u64,
    /// Records closer than this to the previous one are applied in the same tick.
    pub contiguous_window_ms: u64,
    pub click_indicator_ms: u64,
    pub hint_ms: u64,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            speed: 1,
            fast_forward_threshold_ms: 2000,
            contiguous_window_ms: 10,
            click_indicator_ms: 200,
            hint_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    /// Waiting for the surface and rehydrating the root snapshot.
    ShowingFirstScene,
    Playing,
    Paused,
    /// Advancing to a seek target with cosmetic records suppressed.
    SeekingForward,
    /// Every record was applied.
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekEnd {
    Reached,
    Interrupted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    State(PlaybackState),
    Progress(f64),
    Status(String),
    SeekFinished { reason: SeekEnd },
    Finished,
    Error(String),
    Pointer { left: f64, top: f64 },
    Click { left: f64, top: f64 },
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("record sequence broken: expected record {expected}, found {found}")]
    SequenceIntegrity { expected: u64, found: u64 },

    #[error("malformed session: {0}")]
    StructuralShape(String),

    #[error("invalid seek index {index}, total is {len}")]
    Range { index: usize, len: usize },

    #[error("could not fetch session: {0}")]
    Transport(#[from] TransportError),

    #[error("mounting surface failed: {0}")]
    Surface(String),

    #[error("no session loaded")]
    NotLoaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Seek {
    target: usize,
    /// State to return to once the target is reached.
    resume_to: PlaybackState,
}

pub struct Player<S: MountSurface> {
    options: PlayerOptions,
    surface: S,
    session: Option<Arc<SessionResult>>,
    state: PlaybackState,
    stage: Stage,
    normalizer: ResourceNormalizer,
    position: usize,
    last_record_id: Option<u64>,
    seek: Option<Seek>,
    next_tick: Option<u64>,
    overlay: Overlay,
    original: Option<Vec<NodeKey>>,
    events: mpsc::UnboundedSender<PlayerEvent>,
}

impl<S: MountSurface> Player<S> {
    pub fn new(surface: S, mut options: PlayerOptions) -> (Self, mpsc::UnboundedReceiver<PlayerEvent>) {
        options.speed = options.speed.clamp(MIN_SPEED, MAX_SPEED);
        let (events, rx) = mpsc::unbounded_channel();
        let player = Self {
            options,
            surface,
            session: None,
            state: PlaybackState::Idle,
            stage: Stage::new(),
            normalizer: ResourceNormalizer::new(""),
            position: 0,
            last_record_id: None,
            seek: None,
            next_tick: None,
            overlay: Overlay::default(),
            original: None,
            events,
        };
        (player, rx)
    }

    pub fn options(&self) -> &PlayerOptions {
        &self.options
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Number of records applied so far.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn seek_target(&self) -> Option<usize> {
        self.seek.map(|seek| seek.target)
    }

    pub fn session(&self) -> Option<&SessionResult> {
        self.session.as_deref()
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn document(&self) -> &Document {
        self.surface.document()
    }

    pub fn into_surface(mut self) -> S {
        self.reset_runtime();
        self.surface
    }

    pub fn records_len(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.record_items.len())
    }

    pub fn progress(&self) -> f64 {
        pct(self.position as f64, self.records_len() as f64)
    }

    pub fn highlights(&self) -> Vec<HighlightEntry> {
        self.session.as_ref().map(|s| s.highlights()).unwrap_or_default()
    }

    pub fn highlight_semantics(&self) -> Vec<String> {
        self.session
            .as_ref()
            .map(|s| s.highlight_semantics())
            .unwrap_or_default()
    }

    pub fn is_fully_recorded(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_fully_recorded())
    }

    fn emit(&self, event: PlayerEvent) {
        let _ = self.events.send(event);
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state != state {
            tracing::debug!(from = ?self.state, to = ?state, "playback state");
            self.state = state;
            self.emit(PlayerEvent::State(state));
        }
    }

    fn hint(&mut self, message: impl Into<String>, now: u64) {
        let message = message.into();
        self.overlay.show_hint(message.clone(), now, self.options.hint_ms);
        self.emit(PlayerEvent::Status(message));
    }

    /// Report a fatal error and stop.
    fn fail(&mut self, err: ReplayError) -> ReplayError {
        tracing::error!(error = %err, position = self.position, "playback aborted");
        self.emit(PlayerEvent::Error(err.to_string()));
        self.stop();
        err
    }

    // -- configuration ------------------------------------------------------

    pub fn set_speed(&mut self, speed: u32) {
        let clamped = speed.clamp(MIN_SPEED, MAX_SPEED);
        if clamped != speed {
            tracing::warn!(speed, clamped, "playback speed out of range");
        }
        self.options.speed = clamped;
    }

    pub fn set_fast_forward_threshold(&mut self, threshold_ms: u64) {
        self.options.fast_forward_threshold_ms = threshold_ms;
    }

    // -- loading ------------------------------------------------------------

    /// Replace the loaded session. Any running playback is stopped.
    pub fn load(&mut self, session: SessionResult) {
        self.stop();
        tracing::info!(
            session_id = %session.session_id,
            records = session.record_items.len(),
            lost = session.lost_records,
            "session loaded"
        );
        if session.lost_records > 0 {
            self.emit(PlayerEvent::Status(format!("Lost {} records", session.lost_records)));
        }
        self.session = Some(Arc::new(session));
    }

    pub async fn fetch(
        &mut self,
        source: &dyn SessionSource,
        session_id: &str,
        lenient: bool,
    ) -> Result<(), ReplayError> {
        match source.fetch_session(session_id, lenient).await {
            Ok(session) => {
                self.load(session);
                Ok(())
            }
            Err(e) => {
                let err = ReplayError::from(e);
                self.emit(PlayerEvent::Error(err.to_string()));
                Err(err)
            }
        }
    }

    // -- runtime ------------------------------------------------------------

    fn reset_runtime(&mut self) {
        if let Some(original) = self.original.take() {
            unmount(self.surface.document_mut(), &self.stage, original);
        }
        self.stage.clear();
        self.position = 0;
        self.last_record_id = None;
        self.seek = None;
        self.next_tick = None;
        self.overlay.clear();
    }

    async fn show_first_scene(&mut self, now: u64) -> Result<(), ReplayError> {
        let Some(session) = self.session.clone() else {
            return Err(ReplayError::NotLoaded);
        };
        self.reset_runtime();
        self.set_state(PlaybackState::ShowingFirstScene);

        if let Err(e) = self.surface.prepare().await {
            return Err(self.fail(ReplayError::Surface(e)));
        }
        let normalizer = ResourceNormalizer::new(&session.location);
        match mount(self.surface.document_mut(), &mut self.stage, &session.root, &normalizer) {
            Ok(original) => self.original = Some(original),
            Err(e) => return Err(self.fail(e)),
        }
        self.normalizer = normalizer;
        self.emit(PlayerEvent::Progress(0.0));
        self.hint(
            format!("Get ready to play session (fully recorded: {})", session.is_fully_recorded()),
            now,
        );
        Ok(())
    }

    // -- controls -----------------------------------------------------------

    /// Start from the first record. Only valid when idle or finished.
    pub async fn play(&mut self, now: u64) -> Result<(), ReplayError> {
        if !matches!(self.state, PlaybackState::Idle | PlaybackState::Finished) {
            tracing::debug!(state = ?self.state, "play ignored");
            return Ok(());
        }
        self.show_first_scene(now).await?;
        self.set_state(PlaybackState::Playing);
        self.next_tick = Some(now);
        Ok(())
    }

    pub fn pause(&mut self) {
        match self.state {
            PlaybackState::Playing => {
                self.next_tick = None;
                self.set_state(PlaybackState::Paused);
            }
            PlaybackState::SeekingForward => {
                self.next_tick = None;
                self.seek = None;
                self.set_state(PlaybackState::Paused);
                self.emit(PlayerEvent::SeekFinished {
                    reason: SeekEnd::Interrupted,
                });
            }
            _ => {}
        }
    }

    pub fn resume(&mut self, now: u64) {
        if self.state == PlaybackState::Paused {
            self.set_state(PlaybackState::Playing);
            self.next_tick = Some(now);
        }
    }

    /// Stop playback, drop runtime state and put the surface's original content back.
    pub fn stop(&mut self) {
        self.reset_runtime();
        self.set_state(PlaybackState::Idle);
    }

    /// Leave seeking mode where it is, paused.
    pub fn interrupt_seeking(&mut self, now: u64) {
        if self.state != PlaybackState::SeekingForward {
            return;
        }
        self.pause();
        self.hint("Seeking interrupted, press Resume", now);
    }

    /// Seek until `index` records have been applied.
    ///
    /// Seeking backwards, or from a player that has not applied anything yet,
    /// restarts from the first scene with cosmetic records suppressed.
    /// `index == 0` settles on the first scene without applying anything, and
    /// `index == records_len()` plays through to the end.
    pub async fn rewind(&mut self, index: usize, now: u64) -> Result<(), ReplayError> {
        if self.session.is_none() {
            return Err(ReplayError::NotLoaded);
        }
        let len = self.records_len();
        if index > len {
            let err = ReplayError::Range { index, len };
            tracing::warn!(index, len, "seek index out of range");
            self.emit(PlayerEvent::Error(err.to_string()));
            self.pause();
            self.hint("Seeking error", now);
            return Err(err);
        }

        let resume_to = match self.state {
            PlaybackState::Paused => PlaybackState::Paused,
            PlaybackState::SeekingForward => self.seek.map_or(PlaybackState::Playing, |s| s.resume_to),
            _ => PlaybackState::Playing,
        };

        if index < self.position || self.position == 0 {
            tracing::debug!(index, position = self.position, "seeking from the start");
            self.show_first_scene(now).await?;
        } else if index == self.position {
            return Ok(());
        }
        let seek = Seek {
            target: index,
            resume_to,
        };
        if index == 0 {
            self.finish_seek(seek, now);
            if self.state == PlaybackState::Playing {
                self.next_tick = Some(now);
            }
            return Ok(());
        }
        self.seek = Some(seek);
        self.set_state(PlaybackState::SeekingForward);
        self.next_tick = Some(now);
        Ok(())
    }

    /// Seek to a fraction (`0.0..=1.0`) of the record list.
    pub async fn rewind_percent(&mut self, fraction: f64, now: u64) -> Result<(), ReplayError> {
        let len = self.records_len();
        let index = (len as f64 * fraction).floor();
        if !index.is_finite() || index < 0.0 {
            let err = ReplayError::Range { index: 0, len };
            self.emit(PlayerEvent::Error(err.to_string()));
            return Err(err);
        }
        self.rewind(index as usize, now).await
    }

    // -- scheduling ---------------------------------------------------------

    /// Earliest moment the player needs [`poll`](Self::poll) to be called.
    pub fn next_deadline(&self) -> Option<u64> {
        match (self.next_tick, self.overlay.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Expire overlay items and run the pending tick if it is due.
    pub fn poll(&mut self, now: u64) -> Result<(), ReplayError> {
        let expired = self.overlay.expire(now);
        if expired.click {
            let (left, top) = self.overlay.pointer();
            self.emit(PlayerEvent::Pointer { left, top });
        }
        match self.next_tick {
            Some(due) if due <= now => self.tick(now),
            _ => Ok(()),
        }
    }

    /// Apply the next batch of contiguous records and schedule the following tick.
    pub fn tick(&mut self, now: u64) -> Result<(), ReplayError> {
        self.next_tick = None;
        if !matches!(self.state, PlaybackState::Playing | PlaybackState::SeekingForward) {
            return Ok(());
        }
        let Some(session) = self.session.clone() else {
            return Err(ReplayError::NotLoaded);
        };
        let records = &session.record_items;

        let mut previous_ts: Option<u64> = None;
        while let Some(record) = records.get(self.position) {
            if let Some(previous) = previous_ts {
                let distance = record.timestamp.saturating_sub(previous);
                if distance >= self.options.contiguous_window_ms || record.kind.is_scroll() {
                    break;
                }
            }

            let expected = self.last_record_id.map_or(0, |id| id + 1);
            if record.record_id != expected {
                return Err(self.fail(ReplayError::SequenceIntegrity {
                    expected,
                    found: record.record_id,
                }));
            }

            let mut interpreter = Interpreter {
                doc: self.surface.document_mut(),
                stage: &mut self.stage,
                normalizer: &self.normalizer,
                seeking: self.state == PlaybackState::SeekingForward,
            };
            let effect = match interpreter.apply(record) {
                Ok(effect) => effect,
                Err(e) => return Err(self.fail(e)),
            };
            self.last_record_id = Some(record.record_id);
            self.position += 1;
            previous_ts = Some(record.timestamp);
            self.surface_effect(effect, now);
            self.emit(PlayerEvent::Progress(self.progress()));

            if let Some(seek) = self.seek {
                if seek.target <= self.position {
                    self.finish_seek(seek, now);
                    break;
                }
            }
        }

        if self.position >= records.len() {
            self.finish(now);
            return Ok(());
        }

        match self.state {
            PlaybackState::SeekingForward => self.next_tick = Some(now),
            PlaybackState::Playing => {
                let last = previous_ts.unwrap_or_default();
                let gap = records[self.position].timestamp.saturating_sub(last);
                let threshold = self.options.fast_forward_threshold_ms;
                if gap > threshold {
                    self.hint(
                        format!("Fast-forwarding {:.1}s of inactivity", gap as f64 / 1000.0),
                        now,
                    );
                }
                let delay = gap.min(threshold) / u64::from(self.options.speed);
                self.next_tick = Some(now + delay);
            }
            _ => {}
        }
        Ok(())
    }

    fn surface_effect(&mut self, effect: Effect, now: u64) {
        match effect {
            Effect::None => {}
            Effect::Pointer { left, top } => {
                self.overlay.move_pointer(left, top);
                if !self.overlay.is_clicking() {
                    self.emit(PlayerEvent::Pointer { left, top });
                }
            }
            Effect::Click { left, top } => {
                self.overlay.click(left, top, now, self.options.click_indicator_ms);
                self.emit(PlayerEvent::Click { left, top });
            }
            Effect::Hint(message) => self.hint(message, now),
        }
    }

    fn finish_seek(&mut self, seek: Seek, now: u64) {
        tracing::debug!(target = seek.target, position = self.position, "seek reached");
        self.seek = None;
        self.set_state(seek.resume_to);
        self.emit(PlayerEvent::SeekFinished {
            reason: SeekEnd::Reached,
        });
        self.hint("Seeking finished", now);
    }

    fn finish(&mut self, now: u64) {
        self.seek = None;
        self.next_tick = None;
        self.set_state(PlaybackState::Finished);
        self.emit(PlayerEvent::Progress(100.0));
        self.emit(PlayerEvent::Finished);
        if !self.is_fully_recorded() {
            self.hint("Session was not fully recorded", now);
        }
        tracing::info!(
            session_id = self.session.as_ref().map(|s| s.session_id.as_str()).unwrap_or_default(),
            records = self.position,
            "playback finished"
        );
    }
}
