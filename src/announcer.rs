//! AnnouncerCore — central dispatcher for stationVoice.
//!
//! Unified interface for all engine operations. Both the CLI and host UIs
//! interact with the engine through AnnouncerCore methods; the `Announcer`
//! facade pairs a core with the audio runtime thread and feeds its events
//! back into the core's session state.

use crate::board::SlotBoard;
use crate::clip::{probe_duration, ClipStore, SpeechSynthesizer};
use crate::effects::preset_by_name;
use crate::line::Line;
use crate::queue::build_queue;
use crate::runtime::{
    spawn_announcer, AnnouncerEvent, AnnouncerHandle, QueueItem, RunToken,
};
use crate::session::{wrap_index, PlayAction, PlaybackPhase, PlaybackSession, ProgressTracker};
use crate::slot::{AudioAssignment, ClipSource, SlotKey};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

// ── Log buffer ──────────────────────────────────────────────────────────────

const LOG_BUFFER_MAX: usize = 500;

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub message: String,
}

pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
}

impl LogBuffer {
    pub fn new() -> Self {
        LogBuffer {
            entries: VecDeque::new(),
        }
    }

    pub fn push(&mut self, level: &str, message: String) {
        let timestamp = chrono::Local::now().format("%H:%M:%S").to_string();
        self.entries.push_back(LogEntry {
            timestamp,
            level: level.to_string(),
            message,
        });
        while self.entries.len() > LOG_BUFFER_MAX {
            self.entries.pop_front();
        }
    }

    pub fn get(&self, since_index: usize) -> Vec<LogEntry> {
        self.entries.iter().skip(since_index).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

// ── Snapshots & response data ───────────────────────────────────────────────

/// The "currently announcing" notification consumed by the map canvas:
/// the station being announced (None for between/segment clips) and whether
/// audio is sounding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NowAnnouncing {
    pub station_id: Option<String>,
    pub is_playing: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotData {
    pub key: String,
    pub display_name: Option<String>,
    pub kind: Option<String>,
    pub duration_secs: Option<f64>,
    pub remaining_secs: Option<u64>,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusData {
    pub line_name: String,
    pub station_count: usize,
    pub is_loop: bool,
    pub assigned_slots: usize,
    pub queue_length: usize,
    pub total_duration_secs: u64,
    pub elapsed_secs: u64,
    pub remaining_secs: u64,
    pub phase: String,
    pub queue_index: usize,
    pub speed: f32,
    pub volume: f32,
    pub muted: bool,
    pub environment: Option<String>,
}

// ── Persistence ─────────────────────────────────────────────────────────────

/// The host-shared editing state: the selected line and the slot board.
/// Playback state is deliberately not persisted.
#[derive(Deserialize)]
struct PersistedState {
    line: Line,
    board: SlotBoard,
}

#[derive(Serialize)]
struct PersistedStateRef<'a> {
    line: &'a Line,
    board: &'a SlotBoard,
}

/// Default state file location under the user's local data directory.
pub fn default_state_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("stationvoice")
        .join("stationvoice_state.json")
}

// ── AnnouncerCore ───────────────────────────────────────────────────────────

pub struct AnnouncerCore {
    pub line: Line,
    pub board: SlotBoard,
    pub clips: ClipStore,
    pub session: PlaybackSession,
    pub tracker: ProgressTracker,
    pub logs: LogBuffer,
    pub environment: Option<String>,
    state_path: Option<PathBuf>,
}

impl AnnouncerCore {
    /// Create a core, loading editing state from `state_path` when present.
    pub fn new(state_path: Option<PathBuf>, clip_dir: PathBuf) -> Result<Self, String> {
        let mut clips = ClipStore::new(clip_dir)?;
        let (line, board) = match state_path.as_deref().and_then(load_state) {
            Some(state) => (state.line, state.board),
            None => (Line::default(), SlotBoard::new()),
        };
        for (_, assignment) in board.assignments() {
            if let Some(url) = assignment.owned_url() {
                clips.readopt(url);
            }
        }
        let mut core = AnnouncerCore {
            line,
            board,
            clips,
            session: PlaybackSession::new(),
            tracker: ProgressTracker::new(),
            logs: LogBuffer::new(),
            environment: None,
            state_path,
        };
        core.refresh_durations();
        Ok(core)
    }

    /// A fresh in-memory core with a throwaway clip store. For testing.
    pub fn new_test() -> Self {
        let dir = std::env::temp_dir()
            .join("stationvoice_test")
            .join(format!("clips_{}_{:08x}", std::process::id(), fastrand::u32(..)));
        AnnouncerCore {
            line: Line::default(),
            board: SlotBoard::new(),
            clips: ClipStore::new(dir).expect("temp clip store"),
            session: PlaybackSession::new(),
            tracker: ProgressTracker::new(),
            logs: LogBuffer::new(),
            environment: None,
            state_path: None,
        }
    }

    fn save(&self) -> Result<(), String> {
        let Some(path) = &self.state_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Cannot create '{}': {}", parent.display(), e))?;
        }
        let state = PersistedStateRef {
            line: &self.line,
            board: &self.board,
        };
        let json = serde_json::to_string_pretty(&state)
            .map_err(|e| format!("Serialize error: {}", e))?;
        fs::write(path, json).map_err(|e| format!("Write error: {}", e))?;
        Ok(())
    }

    // ── Line selection ──────────────────────────────────────────────────

    /// Switch the active line: keep assignments still reachable, seed every
    /// other line slot with a rotating default clip, leave unreachable
    /// assignments in memory untouched.
    pub fn set_line(&mut self, line: Line) -> Result<(), String> {
        self.line = line;
        self.board.reconcile_for_line(&self.line);
        self.tracker.clear_all_remaining();
        self.session = PlaybackSession::new();
        self.refresh_durations();
        self.logs.push(
            "info",
            format!(
                "Line '{}' selected ({} stations)",
                self.line.name,
                self.line.visited_stations().len()
            ),
        );
        self.save()
    }

    /// Probe durations for reachable assigned slots that have none yet.
    /// Failures degrade: the slot stays unresolved and out of the totals.
    fn refresh_durations(&mut self) {
        for key in self.queue() {
            if self.tracker.duration(&key).is_some() {
                continue;
            }
            let path = match self.board.assignment(&key) {
                Some(assignment) => self.resolve_path(assignment),
                None => continue,
            };
            if let Ok(duration) = probe_duration(&path) {
                self.tracker.set_duration(key, duration);
            }
        }
    }

    // ── Slot validity & resolution ──────────────────────────────────────

    /// A key is operable when it resolves against the current line; segment
    /// keys must additionally exist in their between slot's list.
    pub fn key_valid(&self, key: &SlotKey) -> bool {
        match key {
            SlotKey::Segment(..) => key.parent_between().is_some_and(|between| {
                SlotBoard::key_reachable(&self.line, &between)
                    && self.board.extra_segments_of(&between).contains(key)
            }),
            _ => SlotBoard::key_reachable(&self.line, key),
        }
    }

    /// The playable file behind an assignment. Stale clip URLs resolve to a
    /// nonexistent path; playback then fails per clip, which the scheduler
    /// treats as that clip finishing.
    pub fn resolve_path(&self, assignment: &AudioAssignment) -> PathBuf {
        match &assignment.source {
            ClipSource::Preset { path } => path.clone(),
            ClipSource::Upload { url } | ClipSource::Generated { url } => self
                .clips
                .resolve(url)
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(url)),
        }
    }

    // ── Assignment operations ───────────────────────────────────────────

    /// Bind a clip to a slot, replacing any existing assignment. The
    /// displaced assignment's revocable resource is released after the swap
    /// unless the new assignment reuses it. Invalid slot keys are ignored
    /// and logged.
    pub fn bind_assignment(
        &mut self,
        key: SlotKey,
        assignment: AudioAssignment,
    ) -> Result<(), String> {
        if !self.key_valid(&key) {
            self.logs.push(
                "warn",
                format!("Ignoring clip for slot '{}' not on line '{}'", key, self.line.name),
            );
            return Ok(());
        }
        let path = self.resolve_path(&assignment);
        let new_url = assignment.owned_url().map(str::to_string);
        let displaced = self.board.bind(key.clone(), assignment);
        if let Some(old) = displaced {
            if let Some(url) = old.owned_url() {
                if Some(url) != new_url.as_deref() {
                    self.clips.release(url);
                }
            }
        }
        match probe_duration(&path) {
            Ok(duration) => self.tracker.set_duration(key.clone(), duration),
            Err(e) => {
                self.tracker.clear_duration(&key);
                self.logs
                    .push("warn", format!("Duration unavailable for '{}': {}", key, e));
            }
        }
        self.save()
    }

    /// Remove a slot's assignment and release its owned resource.
    pub fn unbind_assignment(&mut self, key: &SlotKey) -> Result<(), String> {
        if let Some(removed) = self.board.unbind(key) {
            if let Some(url) = removed.owned_url() {
                self.clips.release(url);
            }
            self.tracker.clear_duration(key);
            self.tracker.clear_remaining(key);
            self.save()?;
        }
        Ok(())
    }

    /// Copy an uploaded file into the clip store and bind it.
    pub fn assign_upload(&mut self, key: SlotKey, file: &Path) -> Result<(), String> {
        let (url, display_name) = self.clips.acquire_upload(file)?;
        self.bind_assignment(key, AudioAssignment::upload(url, &display_name))
    }

    /// Generate a clip remotely and bind it. Synthesis failures are surfaced
    /// to the caller and leave any existing assignment untouched.
    pub fn assign_generated(
        &mut self,
        key: SlotKey,
        synthesizer: &dyn SpeechSynthesizer,
        text: &str,
        voice: &str,
    ) -> Result<(), String> {
        let bytes = synthesizer
            .synthesize(text, voice)
            .map_err(|e| format!("Speech generation failed: {}", e))?;
        let url = self.clips.store_generated(&bytes)?;
        let display_name: String = text.chars().take(40).collect();
        self.bind_assignment(key, AudioAssignment::generated(url, &display_name))
    }

    // ── Extra segments ──────────────────────────────────────────────────

    /// Append an extra segment under a between slot. No-op (logged) when the
    /// pair is not adjacent on the current line.
    pub fn add_extra_segment(&mut self, between: &SlotKey) -> Result<Option<SlotKey>, String> {
        match self.board.add_extra_segment(&self.line, between) {
            Some(key) => {
                self.save()?;
                Ok(Some(key))
            }
            None => {
                self.logs.push(
                    "warn",
                    format!("Cannot add segment under '{}': not adjacent on this line", between),
                );
                Ok(None)
            }
        }
    }

    /// Remove an extra segment and release its clip.
    pub fn remove_extra_segment(
        &mut self,
        between: &SlotKey,
        segment: &SlotKey,
    ) -> Result<(), String> {
        if let Some(removed) = self.board.remove_extra_segment(between, segment) {
            if let Some(url) = removed.owned_url() {
                self.clips.release(url);
            }
        }
        self.tracker.clear_duration(segment);
        self.tracker.clear_remaining(segment);
        self.save()
    }

    // ── Queue & timing ──────────────────────────────────────────────────

    /// The playback order, recomputed from the line and board on every call.
    pub fn queue(&self) -> Vec<SlotKey> {
        build_queue(&self.line, &self.board)
    }

    /// The queue resolved to playable items for the runtime.
    pub fn queue_items(&self) -> Vec<QueueItem> {
        self.queue()
            .into_iter()
            .map(|key| {
                let duration = self.tracker.duration(&key);
                let path = self
                    .board
                    .assignment(&key)
                    .map(|a| self.resolve_path(a))
                    .unwrap_or_default();
                QueueItem {
                    slot: key,
                    path,
                    duration,
                }
            })
            .collect()
    }

    /// Resolve one slot to a playable item; None (logged) for invalid or
    /// unassigned slots.
    pub fn prepare_item(&mut self, key: &SlotKey) -> Option<QueueItem> {
        if !self.key_valid(key) {
            self.logs
                .push("warn", format!("Ignoring play request for invalid slot '{}'", key));
            return None;
        }
        let Some(assignment) = self.board.assignment(key) else {
            self.logs
                .push("warn", format!("Slot '{}' has no clip", key));
            return None;
        };
        Some(QueueItem {
            slot: key.clone(),
            path: self.resolve_path(assignment),
            duration: self.tracker.duration(key),
        })
    }

    pub fn total_duration_secs(&self) -> u64 {
        self.tracker.total_secs(&self.queue())
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.tracker.elapsed_secs(&self.queue(), self.session.queue_index)
    }

    pub fn remaining_total_secs(&self) -> u64 {
        self.tracker.remaining_secs(&self.queue(), self.session.queue_index)
    }

    // ── Snapshots ───────────────────────────────────────────────────────

    pub fn now_announcing(&self) -> NowAnnouncing {
        NowAnnouncing {
            station_id: self
                .session
                .active_slot
                .as_ref()
                .and_then(|k| k.station_id().map(str::to_string)),
            is_playing: self.session.phase.is_sounding(),
        }
    }

    pub fn get_status(&self) -> StatusData {
        let queue = self.queue();
        StatusData {
            line_name: self.line.name.clone(),
            station_count: self.line.visited_stations().len(),
            is_loop: self.line.is_loop(),
            assigned_slots: self.board.assignments().count(),
            queue_length: queue.len(),
            total_duration_secs: self.tracker.total_secs(&queue),
            elapsed_secs: self.tracker.elapsed_secs(&queue, self.session.queue_index),
            remaining_secs: self.tracker.remaining_secs(&queue, self.session.queue_index),
            phase: format!("{:?}", self.session.phase),
            queue_index: self.session.queue_index,
            speed: self.session.speed,
            volume: self.session.volume,
            muted: self.session.muted,
            environment: self.environment.clone(),
        }
    }

    /// Every slot of the current line in walk order, with assignment info.
    pub fn slot_listing(&self) -> Vec<SlotData> {
        let raw = &self.line.stations;
        let is_loop = self.line.is_loop();
        let mut keys = Vec::new();
        for i in 0..raw.len() {
            if !(is_loop && i + 1 == raw.len()) {
                keys.push(SlotKey::station(&raw[i]));
            }
            if i + 1 < raw.len() {
                let between = SlotKey::between(&raw[i], &raw[i + 1]);
                let segments: Vec<SlotKey> = self.board.extra_segments_of(&between).to_vec();
                keys.push(between);
                keys.extend(segments);
            }
        }
        keys.into_iter()
            .map(|key| {
                let assignment = self.board.assignment(&key);
                SlotData {
                    key: key.key(),
                    display_name: assignment.map(|a| a.display_label()),
                    kind: assignment.map(|a| a.kind_label().to_string()),
                    duration_secs: self.tracker.duration(&key).map(|d| d.as_secs_f64()),
                    remaining_secs: self.tracker.remaining(&key),
                    active: self.session.active_slot.as_ref() == Some(&key),
                }
            })
            .collect()
    }

    // ── Event application ───────────────────────────────────────────────

    /// Fold a runtime event into the session state. Called from the audio
    /// thread via the `Announcer` facade.
    pub fn apply_event(&mut self, event: &AnnouncerEvent) {
        match event {
            AnnouncerEvent::SlotStarted { slot, queue_index } => {
                match queue_index {
                    Some(index) => self.session.begin_queue_item(slot.clone(), *index),
                    None => self.session.begin_single(slot.clone()),
                }
                self.logs.push("info", format!("Announcing '{}'", slot));
            }
            AnnouncerEvent::Progress {
                slot,
                remaining_secs,
            } => {
                self.tracker.set_remaining(slot.clone(), *remaining_secs);
            }
            AnnouncerEvent::SlotFinished { slot } => {
                self.tracker.clear_remaining(slot);
                if self.session.active_slot.as_ref() == Some(slot)
                    && !self.session.phase.in_queue_run()
                {
                    self.session.finish_single();
                }
            }
            AnnouncerEvent::QueueFinished { completed } => {
                self.session.finish_queue(*completed);
                let note = if *completed { "finished" } else { "stopped" };
                self.logs.push("info", format!("Announcement run {}", note));
            }
            AnnouncerEvent::Stopped => {
                if self.session.phase != PlaybackPhase::Idle {
                    self.session.finish_single();
                }
                self.logs.push("info", "Playback stopped".to_string());
            }
            AnnouncerEvent::Paused => self.session.pause(),
            AnnouncerEvent::Resumed => self.session.resume(),
            AnnouncerEvent::PlayError { slot, message } => {
                let label = slot.as_ref().map(|k| k.key()).unwrap_or_default();
                self.logs
                    .push("error", format!("Playback error on '{}': {}", label, message));
            }
        }
    }
}

fn load_state(path: &Path) -> Option<PersistedState> {
    if !path.exists() {
        return None;
    }
    match fs::read_to_string(path) {
        Ok(data) => match serde_json::from_str(&data) {
            Ok(state) => Some(state),
            Err(e) => {
                eprintln!("Warning: corrupt state file, starting fresh: {}", e);
                None
            }
        },
        Err(e) => {
            eprintln!("Warning: could not read state file: {}", e);
            None
        }
    }
}

// ── Announcer facade ────────────────────────────────────────────────────────

pub type AnnouncingCallback = Box<dyn Fn(NowAnnouncing) + Send + 'static>;

/// A core paired with the audio runtime. All transport operations go through
/// here; the runtime's events are folded back into the core and surfaced as
/// "currently announcing" notifications.
pub struct Announcer {
    core: Arc<Mutex<AnnouncerCore>>,
    handle: AnnouncerHandle,
    run_token: Arc<Mutex<Option<RunToken>>>,
}

impl Announcer {
    pub fn spawn(core: AnnouncerCore, on_announcing: Option<AnnouncingCallback>) -> Self {
        let core = Arc::new(Mutex::new(core));
        let events_core = core.clone();
        let handle = spawn_announcer(move |event| {
            let mut core = events_core.lock().expect("core mutex poisoned");
            let before = core.now_announcing();
            core.apply_event(&event);
            let after = core.now_announcing();
            if before != after {
                if let Some(callback) = &on_announcing {
                    callback(after);
                }
            }
        });
        Announcer {
            core,
            handle,
            run_token: Arc::new(Mutex::new(None)),
        }
    }

    /// Shared access to the core for host reads and slot editing.
    pub fn core(&self) -> Arc<Mutex<AnnouncerCore>> {
        self.core.clone()
    }

    fn lock_core(&self) -> std::sync::MutexGuard<'_, AnnouncerCore> {
        self.core.lock().expect("core mutex poisoned")
    }

    fn halt_run(&self) {
        if let Some(token) = self.run_token.lock().expect("token mutex poisoned").take() {
            token.halt();
        }
    }

    /// Play, pause or resume one slot depending on the session state.
    pub fn play_slot(&self, key: &SlotKey) {
        let mut core = self.lock_core();
        match core.session.play_slot_action(key) {
            PlayAction::Pause => self.handle.pause(),
            PlayAction::Resume => self.handle.resume(),
            PlayAction::Start => {
                if let Some(item) = core.prepare_item(key) {
                    // A fresh single play tears down any queue run first.
                    self.halt_run();
                    self.handle.play_clip(item);
                }
            }
        }
    }

    /// Walk the queue from `index`, or from the preserved position after a
    /// stop when `index` is None.
    pub fn play_queue_from(&self, index: Option<usize>) {
        let mut core = self.lock_core();
        let items = core.queue_items();
        if items.is_empty() {
            core.logs
                .push("warn", "Queue is empty; nothing to announce".to_string());
            return;
        }
        let start = index.unwrap_or(core.session.queue_index).min(items.len() - 1);
        self.halt_run();
        let token = RunToken::new();
        *self.run_token.lock().expect("token mutex poisoned") = Some(token.clone());
        self.handle.play_queue(items, start, token);
    }

    pub fn pause(&self) {
        self.handle.pause();
    }

    pub fn resume(&self) {
        self.handle.resume();
    }

    /// Stop playback. A queue run keeps its position for a later resume.
    pub fn stop(&self) {
        self.halt_run();
        self.handle.stop();
    }

    pub fn skip_next(&self) {
        self.skip(true);
    }

    pub fn skip_previous(&self) {
        self.skip(false);
    }

    fn skip(&self, forward: bool) {
        let mut core = self.lock_core();
        if core.session.phase.in_queue_run() {
            if forward {
                self.handle.skip_next();
            } else {
                self.handle.skip_previous();
            }
        } else {
            // Idle skips only move the pointer, without starting audio.
            let len = core.queue().len();
            if len > 0 {
                core.session.queue_index = wrap_index(core.session.queue_index, forward, len);
            }
        }
    }

    pub fn set_speed(&self, rate: f32) {
        let mut core = self.lock_core();
        core.session.set_speed(rate);
        self.handle.set_speed(rate);
    }

    pub fn set_volume(&self, level: f32) {
        let mut core = self.lock_core();
        core.session.set_volume(level);
        self.handle.set_volume(core.session.effective_volume());
    }

    pub fn set_muted(&self, muted: bool) {
        let mut core = self.lock_core();
        core.session.set_muted(muted);
        self.handle.set_volume(core.session.effective_volume());
    }

    /// Select the acoustic environment for subsequently started clips, or
    /// None to bypass the effects chain. Unknown names are an error.
    pub fn set_environment(&self, preset: Option<String>) -> Result<(), String> {
        if let Some(name) = &preset {
            if preset_by_name(name).is_none() {
                return Err(format!("Unknown environment preset '{}'", name));
            }
        }
        let mut core = self.lock_core();
        core.environment = preset.clone();
        self.handle.set_preset(preset);
        Ok(())
    }

    pub fn shutdown(&self) {
        self.halt_run();
        self.handle.shutdown();
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn line_of(ids: &[&str]) -> Line {
        Line::new("Test", ids.iter().map(|s| s.to_string()).collect())
    }

    fn make_core_with_line(ids: &[&str]) -> AnnouncerCore {
        let mut core = AnnouncerCore::new_test();
        core.set_line(line_of(ids)).unwrap();
        core
    }

    #[test]
    fn set_line_seeds_full_queue() {
        let core = make_core_with_line(&["a", "b", "c"]);
        assert_eq!(core.queue().len(), 5);
        assert_eq!(core.get_status().queue_length, 5);
    }

    #[test]
    fn bind_on_invalid_slot_is_logged_noop() {
        let mut core = make_core_with_line(&["a", "b"]);
        let ghost = SlotKey::station("ghost");
        core.bind_assignment(ghost.clone(), AudioAssignment::preset("x.mp3".into(), "X"))
            .unwrap();
        assert!(!core.board.is_assigned(&ghost));
        assert!(core.logs.get(0).iter().any(|e| e.level == "warn"));
    }

    #[test]
    fn bind_on_unlisted_segment_key_is_rejected() {
        let mut core = make_core_with_line(&["a", "b"]);
        let phantom = SlotKey::segment("a", "b", 123);
        core.bind_assignment(phantom.clone(), AudioAssignment::preset("x.mp3".into(), "X"))
            .unwrap();
        assert!(!core.board.is_assigned(&phantom));

        let real = core
            .add_extra_segment(&SlotKey::between("a", "b"))
            .unwrap()
            .unwrap();
        core.bind_assignment(real.clone(), AudioAssignment::preset("x.mp3".into(), "X"))
            .unwrap();
        assert!(core.board.is_assigned(&real));
    }

    #[test]
    fn replacing_upload_releases_resource_exactly_once() {
        let mut core = make_core_with_line(&["a", "b"]);
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("doors.mp3");
        std::fs::write(&file, b"fake audio").unwrap();

        let key = SlotKey::station("a");
        core.assign_upload(key.clone(), &file).unwrap();
        let url = core
            .board
            .assignment(&key)
            .unwrap()
            .owned_url()
            .unwrap()
            .to_string();
        let backing = core.clips.resolve(&url).unwrap().to_path_buf();
        assert!(backing.exists());

        // Replace with a preset clip: the upload's resource goes away once.
        core.bind_assignment(key.clone(), AudioAssignment::preset("chime.mp3".into(), "Chime"))
            .unwrap();
        assert!(!backing.exists());
        assert!(core.clips.resolve(&url).is_none());
        // A later release attempt finds nothing to release.
        assert!(!core.clips.release(&url));
    }

    #[test]
    fn unbind_clears_duration_and_remaining() {
        let mut core = make_core_with_line(&["a", "b"]);
        let key = SlotKey::station("a");
        core.tracker.set_duration(key.clone(), std::time::Duration::from_secs(5));
        core.tracker.set_remaining(key.clone(), 3);
        core.unbind_assignment(&key).unwrap();
        assert!(core.tracker.duration(&key).is_none());
        assert!(core.tracker.remaining(&key).is_none());
        assert!(!core.board.is_assigned(&key));
    }

    #[test]
    fn generated_clip_failure_is_surfaced_and_keeps_old_assignment() {
        struct FailingSynth;
        impl SpeechSynthesizer for FailingSynth {
            fn synthesize(&self, _text: &str, _voice: &str) -> Result<Vec<u8>, String> {
                Err("API quota exceeded".to_string())
            }
        }

        let mut core = make_core_with_line(&["a", "b"]);
        let key = SlotKey::station("a");
        let before = core.board.assignment(&key).cloned();
        let result = core.assign_generated(key.clone(), &FailingSynth, "Next stop: Central", "nova");
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("API quota exceeded"));
        assert_eq!(core.board.assignment(&key).cloned(), before);
    }

    #[test]
    fn generated_clip_success_binds_with_display_name() {
        struct OkSynth;
        impl SpeechSynthesizer for OkSynth {
            fn synthesize(&self, _text: &str, _voice: &str) -> Result<Vec<u8>, String> {
                Ok(b"bytes".to_vec())
            }
        }

        let mut core = make_core_with_line(&["a", "b"]);
        let key = SlotKey::station("a");
        core.assign_generated(key.clone(), &OkSynth, "Next stop: Central", "nova")
            .unwrap();
        let assignment = core.board.assignment(&key).unwrap();
        assert_eq!(assignment.display_label(), "Next stop: Central (generated)");
        assert!(assignment.owned_url().is_some());
    }

    #[test]
    fn now_announcing_reports_station_slots_only() {
        let mut core = make_core_with_line(&["a", "b"]);
        assert_eq!(core.now_announcing().station_id, None);
        assert!(!core.now_announcing().is_playing);

        core.session.begin_queue_item(SlotKey::station("a"), 0);
        let snap = core.now_announcing();
        assert_eq!(snap.station_id.as_deref(), Some("a"));
        assert!(snap.is_playing);

        core.session.begin_queue_item(SlotKey::between("a", "b"), 1);
        assert_eq!(core.now_announcing().station_id, None);
        assert!(core.now_announcing().is_playing);
    }

    #[test]
    fn events_drive_the_session_machine() {
        let mut core = make_core_with_line(&["a", "b"]);
        let slot = SlotKey::station("a");

        core.apply_event(&AnnouncerEvent::SlotStarted {
            slot: slot.clone(),
            queue_index: Some(0),
        });
        assert_eq!(core.session.phase, PlaybackPhase::PlayingQueue);

        core.apply_event(&AnnouncerEvent::Progress {
            slot: slot.clone(),
            remaining_secs: 4,
        });
        assert_eq!(core.tracker.remaining(&slot), Some(4));

        core.apply_event(&AnnouncerEvent::Paused);
        assert_eq!(core.session.phase, PlaybackPhase::PausedQueue);
        core.apply_event(&AnnouncerEvent::Resumed);
        assert_eq!(core.session.phase, PlaybackPhase::PlayingQueue);

        core.apply_event(&AnnouncerEvent::SlotFinished { slot: slot.clone() });
        assert!(core.tracker.remaining(&slot).is_none());
        // Still in the run; the driver will start the next item.
        assert_eq!(core.session.phase, PlaybackPhase::PlayingQueue);

        core.apply_event(&AnnouncerEvent::QueueFinished { completed: true });
        assert_eq!(core.session.phase, PlaybackPhase::Idle);
        assert_eq!(core.session.queue_index, 0);
    }

    #[test]
    fn user_stop_preserves_queue_position() {
        let mut core = make_core_with_line(&["a", "b", "c"]);
        core.apply_event(&AnnouncerEvent::SlotStarted {
            slot: SlotKey::between("a", "b"),
            queue_index: Some(1),
        });
        core.apply_event(&AnnouncerEvent::QueueFinished { completed: false });
        assert_eq!(core.session.phase, PlaybackPhase::Idle);
        assert_eq!(core.session.queue_index, 1);
    }

    #[test]
    fn solo_finish_returns_to_idle() {
        let mut core = make_core_with_line(&["a", "b"]);
        let slot = SlotKey::station("a");
        core.apply_event(&AnnouncerEvent::SlotStarted {
            slot: slot.clone(),
            queue_index: None,
        });
        assert_eq!(core.session.phase, PlaybackPhase::PlayingSingle);
        core.apply_event(&AnnouncerEvent::SlotFinished { slot });
        assert_eq!(core.session.phase, PlaybackPhase::Idle);
        assert!(core.session.active_slot.is_none());
    }

    #[test]
    fn slot_listing_walks_line_order_with_segments() {
        let mut core = make_core_with_line(&["a", "b"]);
        let between = SlotKey::between("a", "b");
        let seg = core.add_extra_segment(&between).unwrap().unwrap();

        let listing = core.slot_listing();
        let keys: Vec<&str> = listing.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(
            keys,
            ["station:a", "between:a-b", seg.key().as_str(), "station:b"]
        );
        // Seeded slots are assigned, the fresh segment is not.
        assert!(listing[0].display_name.is_some());
        assert!(listing[2].display_name.is_none());
    }

    #[test]
    fn state_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("state.json");
        let clip_dir = dir.path().join("clips");

        {
            let mut core =
                AnnouncerCore::new(Some(state_path.clone()), clip_dir.clone()).unwrap();
            core.set_line(line_of(&["a", "b"])).unwrap();
        }

        let core = AnnouncerCore::new(Some(state_path), clip_dir).unwrap();
        assert_eq!(core.line.stations, ["a", "b"]);
        assert_eq!(core.queue().len(), 3);
    }

    #[test]
    fn log_buffer_is_bounded() {
        let mut logs = LogBuffer::new();
        for i in 0..600 {
            logs.push("info", format!("entry {}", i));
        }
        assert_eq!(logs.len(), 500);
        assert_eq!(logs.get(0)[0].message, "entry 100");
    }
}
