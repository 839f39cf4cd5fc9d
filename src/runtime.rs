//! Announcer runtime — dedicated audio thread with channel-based command
//! dispatch.
//!
//! Owns the `Player` on a single thread (no Send/Sync needed). External code
//! communicates via `AnnouncerHandle` (wraps `mpsc::Sender<AnnouncerCmd>`),
//! which is naturally Send+Sync. Clip-end detection and the 100 ms progress
//! tick both happen inside the thread loop via `recv_timeout` +
//! `sink.empty()` / `sink.get_pos()`.
//!
//! The queue driver is cooperative: a `RunToken` continue flag is checked
//! before each item starts, never preempting the clip that is sounding. A
//! clip that fails to start counts as finished, so one bad resource never
//! blocks the rest of the run.

use crate::effects::preset_by_name;
use crate::player::{ClipSettings, Player};
use crate::session::wrap_index;
use crate::slot::SlotKey;
use rodio::Sink;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

/// Poll interval for progress updates and natural-end detection.
pub const PROGRESS_POLL: Duration = Duration::from_millis(100);

// ── Commands & Events ────────────────────────────────────────────────────────

/// One resolved queue entry: the slot, the file behind its assignment, and
/// the probed duration when metadata resolved (None degrades to no progress
/// reporting for that clip).
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub slot: SlotKey,
    pub path: PathBuf,
    pub duration: Option<Duration>,
}

/// Cooperative continue flag for a queue run. Halting takes effect at the
/// next item boundary; the sounding clip is stopped separately.
#[derive(Clone)]
pub struct RunToken {
    live: Arc<AtomicBool>,
}

impl RunToken {
    pub fn new() -> Self {
        RunToken {
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn halt(&self) {
        self.live.store(false, Ordering::Relaxed);
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Relaxed)
    }
}

impl Default for RunToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Commands sent to the announcer thread.
pub enum AnnouncerCmd {
    /// Play a single clip, tearing down whatever is active.
    PlayClip(QueueItem),
    /// Walk a resolved queue from `start`, item by item.
    PlayQueue {
        items: Vec<QueueItem>,
        start: usize,
        token: RunToken,
    },
    Pause,
    Resume,
    Stop,
    SkipNext,
    SkipPrevious,
    SetSpeed(f32),
    /// Effective volume (mute already folded in by the caller).
    SetVolume(f32),
    /// Environment preset for subsequently started clips; None bypasses the
    /// effects chain.
    SetPreset(Option<String>),
    Shutdown,
}

/// Events emitted by the announcer thread back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnouncerEvent {
    SlotStarted {
        slot: SlotKey,
        queue_index: Option<usize>,
    },
    Progress {
        slot: SlotKey,
        remaining_secs: u64,
    },
    SlotFinished {
        slot: SlotKey,
    },
    /// The queue run ended: `completed` is true for natural exhaustion,
    /// false for a halted run.
    QueueFinished {
        completed: bool,
    },
    Stopped,
    Paused,
    Resumed,
    PlayError {
        slot: Option<SlotKey>,
        message: String,
    },
}

// ── Handle ───────────────────────────────────────────────────────────────────

/// Thread-safe handle for sending commands to the announcer runtime.
#[derive(Clone)]
pub struct AnnouncerHandle {
    tx: mpsc::Sender<AnnouncerCmd>,
}

impl AnnouncerHandle {
    pub fn play_clip(&self, item: QueueItem) {
        let _ = self.tx.send(AnnouncerCmd::PlayClip(item));
    }

    pub fn play_queue(&self, items: Vec<QueueItem>, start: usize, token: RunToken) {
        let _ = self.tx.send(AnnouncerCmd::PlayQueue { items, start, token });
    }

    pub fn pause(&self) {
        let _ = self.tx.send(AnnouncerCmd::Pause);
    }

    pub fn resume(&self) {
        let _ = self.tx.send(AnnouncerCmd::Resume);
    }

    pub fn stop(&self) {
        let _ = self.tx.send(AnnouncerCmd::Stop);
    }

    pub fn skip_next(&self) {
        let _ = self.tx.send(AnnouncerCmd::SkipNext);
    }

    pub fn skip_previous(&self) {
        let _ = self.tx.send(AnnouncerCmd::SkipPrevious);
    }

    pub fn set_speed(&self, rate: f32) {
        let _ = self.tx.send(AnnouncerCmd::SetSpeed(rate));
    }

    pub fn set_volume(&self, level: f32) {
        let _ = self.tx.send(AnnouncerCmd::SetVolume(level));
    }

    pub fn set_preset(&self, preset: Option<String>) {
        let _ = self.tx.send(AnnouncerCmd::SetPreset(preset));
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(AnnouncerCmd::Shutdown);
    }
}

// ── Runtime ──────────────────────────────────────────────────────────────────

/// Spawn the announcer runtime on a dedicated thread.
///
/// `on_event` is called from the audio thread on every state change; the
/// caller uses it to update session state and notify the host UI.
pub fn spawn_announcer<F>(on_event: F) -> AnnouncerHandle
where
    F: Fn(AnnouncerEvent) + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<AnnouncerCmd>();

    std::thread::Builder::new()
        .name("announcer-audio".into())
        .spawn(move || {
            runtime_loop(rx, on_event);
        })
        .expect("failed to spawn announcer-audio thread");

    AnnouncerHandle { tx }
}

/// The clip currently owning the audio output.
struct ActiveClip {
    slot: SlotKey,
    duration: Option<Duration>,
    queue_index: Option<usize>,
    sink: Sink,
}

struct RuntimeState {
    player: Option<Player>,
    active: Option<ActiveClip>,
    queue: Vec<QueueItem>,
    queue_index: usize,
    run: Option<RunToken>,
    speed: f32,
    volume: f32,
    preset: Option<String>,
}

impl RuntimeState {
    fn new() -> Self {
        RuntimeState {
            player: None,
            active: None,
            queue: Vec::new(),
            queue_index: 0,
            run: None,
            speed: 1.0,
            volume: 1.0,
            preset: None,
        }
    }

    fn stop_active(&mut self) {
        if let Some(clip) = self.active.take() {
            clip.sink.stop();
        }
    }

    /// Decode and start one clip. Lazy-inits the player on first use so a
    /// machine without an audio device fails per clip, not at spawn.
    fn try_start(
        &mut self,
        item: &QueueItem,
        queue_index: Option<usize>,
    ) -> Result<(), String> {
        if self.player.is_none() {
            self.player = Some(Player::new()?);
        }
        let player = self.player.as_ref().expect("player just initialized");
        let preset = self.preset.as_deref().and_then(preset_by_name);
        let settings = ClipSettings {
            speed: self.speed,
            volume: self.volume,
        };
        let sink = player.play_clip(&item.path, settings, preset)?;
        self.active = Some(ActiveClip {
            slot: item.slot.clone(),
            duration: item.duration,
            queue_index,
            sink,
        });
        Ok(())
    }
}

fn runtime_loop<F>(rx: mpsc::Receiver<AnnouncerCmd>, on_event: F)
where
    F: Fn(AnnouncerEvent),
{
    let mut state = RuntimeState::new();

    loop {
        match rx.recv_timeout(PROGRESS_POLL) {
            Ok(cmd) => match cmd {
                AnnouncerCmd::PlayClip(item) => {
                    state.stop_active();
                    state.run = None;
                    state.queue.clear();
                    match state.try_start(&item, None) {
                        Ok(()) => on_event(AnnouncerEvent::SlotStarted {
                            slot: item.slot.clone(),
                            queue_index: None,
                        }),
                        Err(e) => {
                            on_event(AnnouncerEvent::PlayError {
                                slot: Some(item.slot.clone()),
                                message: e,
                            });
                            // A clip that cannot start counts as finished.
                            on_event(AnnouncerEvent::SlotFinished { slot: item.slot });
                        }
                    }
                }

                AnnouncerCmd::PlayQueue { items, start, token } => {
                    state.stop_active();
                    state.queue = items;
                    state.queue_index = start;
                    state.run = Some(token);
                    start_queue_item(&mut state, &on_event);
                }

                AnnouncerCmd::Pause => {
                    if let Some(clip) = &state.active {
                        clip.sink.pause();
                    }
                    on_event(AnnouncerEvent::Paused);
                }

                AnnouncerCmd::Resume => {
                    if let Some(clip) = &state.active {
                        clip.sink.play();
                    }
                    on_event(AnnouncerEvent::Resumed);
                }

                AnnouncerCmd::Stop => {
                    if let Some(token) = &state.run {
                        token.halt();
                    }
                    let was_queue = state.run.take().is_some();
                    state.stop_active();
                    state.queue.clear();
                    if was_queue {
                        on_event(AnnouncerEvent::QueueFinished { completed: false });
                    } else {
                        on_event(AnnouncerEvent::Stopped);
                    }
                }

                AnnouncerCmd::SkipNext | AnnouncerCmd::SkipPrevious
                    if state.run.is_some() && !state.queue.is_empty() =>
                {
                    let forward = matches!(cmd, AnnouncerCmd::SkipNext);
                    if let Some(clip) = state.active.take() {
                        clip.sink.stop();
                        on_event(AnnouncerEvent::SlotFinished { slot: clip.slot });
                    }
                    state.queue_index = wrap_index(state.queue_index, forward, state.queue.len());
                    start_queue_item(&mut state, &on_event);
                }
                // Skips with no queue loaded are pointer moves handled by the
                // caller; nothing to do on the audio thread.
                AnnouncerCmd::SkipNext | AnnouncerCmd::SkipPrevious => {}

                AnnouncerCmd::SetSpeed(rate) => {
                    state.speed = rate;
                    if let Some(clip) = &state.active {
                        clip.sink.set_speed(rate);
                    }
                }

                AnnouncerCmd::SetVolume(level) => {
                    state.volume = level;
                    if let Some(clip) = &state.active {
                        clip.sink.set_volume(level);
                    }
                }

                AnnouncerCmd::SetPreset(preset) => {
                    state.preset = preset;
                }

                AnnouncerCmd::Shutdown => {
                    state.stop_active();
                    break;
                }
            },

            Err(mpsc::RecvTimeoutError::Timeout) => {
                tick(&mut state, &on_event);
            }

            Err(mpsc::RecvTimeoutError::Disconnected) => {
                // All senders dropped — shut down.
                state.stop_active();
                break;
            }
        }
    }
}

/// Start the item at `state.queue_index`, walking forward over items that
/// fail to start. Ends the run when the token is halted or the queue is
/// exhausted.
fn start_queue_item<F>(state: &mut RuntimeState, on_event: &F)
where
    F: Fn(AnnouncerEvent),
{
    loop {
        let live = state.run.as_ref().map_or(false, |t| t.is_live());
        if !live {
            state.run = None;
            state.queue.clear();
            on_event(AnnouncerEvent::QueueFinished { completed: false });
            return;
        }
        let Some(item) = state.queue.get(state.queue_index).cloned() else {
            state.run = None;
            state.queue.clear();
            on_event(AnnouncerEvent::QueueFinished { completed: true });
            return;
        };
        match state.try_start(&item, Some(state.queue_index)) {
            Ok(()) => {
                on_event(AnnouncerEvent::SlotStarted {
                    slot: item.slot,
                    queue_index: Some(state.queue_index),
                });
                return;
            }
            Err(e) => {
                on_event(AnnouncerEvent::PlayError {
                    slot: Some(item.slot.clone()),
                    message: e,
                });
                on_event(AnnouncerEvent::SlotFinished { slot: item.slot });
                if state.queue_index + 1 < state.queue.len() {
                    state.queue_index += 1;
                } else {
                    state.run = None;
                    state.queue.clear();
                    on_event(AnnouncerEvent::QueueFinished { completed: true });
                    return;
                }
            }
        }
    }
}

/// Timeout tick: detect natural clip end, advance the queue, and report
/// progress for the sounding clip.
fn tick<F>(state: &mut RuntimeState, on_event: &F)
where
    F: Fn(AnnouncerEvent),
{
    let finished = state.active.as_ref().map_or(false, |c| c.sink.empty());
    if finished {
        let clip = state.active.take().expect("active clip checked above");
        on_event(AnnouncerEvent::SlotFinished {
            slot: clip.slot.clone(),
        });
        if let Some(index) = clip.queue_index {
            state.queue_index = index + 1;
            if state.queue_index < state.queue.len() {
                start_queue_item(state, on_event);
            } else {
                let completed = state.run.as_ref().map_or(false, |t| t.is_live());
                state.run = None;
                state.queue.clear();
                on_event(AnnouncerEvent::QueueFinished { completed });
            }
        }
        return;
    }

    if let Some(clip) = &state.active {
        if !clip.sink.is_paused() {
            if let Some(duration) = clip.duration {
                let position = clip.sink.get_pos();
                let remaining_secs =
                    duration.saturating_sub(position).as_secs_f64().ceil() as u64;
                on_event(AnnouncerEvent::Progress {
                    slot: clip.slot.clone(),
                    remaining_secs,
                });
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn collect_events() -> (Arc<Mutex<Vec<AnnouncerEvent>>>, AnnouncerHandle) {
        let events: Arc<Mutex<Vec<AnnouncerEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let handle = spawn_announcer(move |evt| {
            sink.lock().unwrap().push(evt);
        });
        (events, handle)
    }

    fn bad_item(name: &str) -> QueueItem {
        QueueItem {
            slot: SlotKey::station(name),
            path: PathBuf::from(format!("__missing_{}.mp3", name)),
            duration: None,
        }
    }

    #[test]
    fn handle_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AnnouncerHandle>();
    }

    #[test]
    fn shutdown_stops_thread() {
        let (_events, handle) = collect_events();
        handle.shutdown();
        std::thread::sleep(Duration::from_millis(100));
    }

    #[test]
    fn solo_play_of_missing_file_errors_and_finishes() {
        let (events, handle) = collect_events();
        handle.play_clip(bad_item("a"));
        std::thread::sleep(Duration::from_millis(300));

        let evts = events.lock().unwrap();
        assert!(
            evts.iter()
                .any(|e| matches!(e, AnnouncerEvent::PlayError { .. })),
            "Expected PlayError, got: {:?}",
            *evts
        );
        assert!(
            evts.iter()
                .any(|e| matches!(e, AnnouncerEvent::SlotFinished { .. })),
            "Errors must count as finished, got: {:?}",
            *evts
        );
        drop(evts);
        handle.shutdown();
    }

    #[test]
    fn queue_of_failing_items_runs_to_natural_completion() {
        let (events, handle) = collect_events();
        handle.play_queue(vec![bad_item("a"), bad_item("b")], 0, RunToken::new());
        std::thread::sleep(Duration::from_millis(400));

        let evts = events.lock().unwrap();
        let errors = evts
            .iter()
            .filter(|e| matches!(e, AnnouncerEvent::PlayError { .. }))
            .count();
        assert_eq!(errors, 2, "one error per item, got: {:?}", *evts);
        assert!(
            evts.iter()
                .any(|e| *e == AnnouncerEvent::QueueFinished { completed: true }),
            "All-failed queue still completes naturally, got: {:?}",
            *evts
        );
        drop(evts);
        handle.shutdown();
    }

    #[test]
    fn halted_token_ends_run_before_first_item() {
        let (events, handle) = collect_events();
        let token = RunToken::new();
        token.halt();
        handle.play_queue(vec![bad_item("a")], 0, token);
        std::thread::sleep(Duration::from_millis(300));

        let evts = events.lock().unwrap();
        assert!(
            evts.iter()
                .any(|e| *e == AnnouncerEvent::QueueFinished { completed: false }),
            "Halted run must not complete, got: {:?}",
            *evts
        );
        assert!(
            !evts
                .iter()
                .any(|e| matches!(e, AnnouncerEvent::SlotStarted { .. })),
            "Halted run must not start items, got: {:?}",
            *evts
        );
        drop(evts);
        handle.shutdown();
    }

    #[test]
    fn stop_without_queue_emits_stopped() {
        let (events, handle) = collect_events();
        handle.stop();
        std::thread::sleep(Duration::from_millis(200));

        let evts = events.lock().unwrap();
        assert!(
            evts.iter().any(|e| *e == AnnouncerEvent::Stopped),
            "Expected Stopped, got: {:?}",
            *evts
        );
        drop(evts);
        handle.shutdown();
    }
}
