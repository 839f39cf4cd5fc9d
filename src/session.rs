//! Playback session state.
//!
//! One explicit five-phase machine covers both single-clip and whole-queue
//! playback; the phase plus the active slot fully determine what a play
//! request on a slot means (start / pause / resume). Aggregate time math
//! lives in `ProgressTracker` and is a UI approximation at the granularity
//! of the 100 ms progress poll.

use crate::slot::SlotKey;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackPhase {
    Idle,
    PlayingSingle,
    PausedSingle,
    PlayingQueue,
    PausedQueue,
}

impl PlaybackPhase {
    /// True while audio is audibly progressing.
    pub fn is_sounding(self) -> bool {
        matches!(self, PlaybackPhase::PlayingSingle | PlaybackPhase::PlayingQueue)
    }

    /// True while a queue run is in progress, paused or not.
    pub fn in_queue_run(self) -> bool {
        matches!(self, PlaybackPhase::PlayingQueue | PlaybackPhase::PausedQueue)
    }

    pub fn is_paused(self) -> bool {
        matches!(self, PlaybackPhase::PausedSingle | PlaybackPhase::PausedQueue)
    }
}

/// What a `play_slot` request means given the current session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayAction {
    /// The slot is active and sounding: pause it.
    Pause,
    /// The slot is active and paused: resume from the current position.
    Resume,
    /// Anything else: tear down whatever is active and start fresh.
    Start,
}

#[derive(Debug)]
pub struct PlaybackSession {
    pub phase: PlaybackPhase,
    pub active_slot: Option<SlotKey>,
    pub queue_index: usize,
    pub speed: f32,
    pub volume: f32,
    pub muted: bool,
}

impl PlaybackSession {
    pub fn new() -> Self {
        PlaybackSession {
            phase: PlaybackPhase::Idle,
            active_slot: None,
            queue_index: 0,
            speed: 1.0,
            volume: 1.0,
            muted: false,
        }
    }

    pub fn play_slot_action(&self, key: &SlotKey) -> PlayAction {
        if self.active_slot.as_ref() == Some(key) {
            match self.phase {
                PlaybackPhase::PlayingSingle | PlaybackPhase::PlayingQueue => PlayAction::Pause,
                PlaybackPhase::PausedSingle | PlaybackPhase::PausedQueue => PlayAction::Resume,
                PlaybackPhase::Idle => PlayAction::Start,
            }
        } else {
            PlayAction::Start
        }
    }

    pub fn begin_single(&mut self, key: SlotKey) {
        self.phase = PlaybackPhase::PlayingSingle;
        self.active_slot = Some(key);
    }

    pub fn begin_queue_item(&mut self, key: SlotKey, index: usize) {
        self.phase = PlaybackPhase::PlayingQueue;
        self.active_slot = Some(key);
        self.queue_index = index;
    }

    pub fn pause(&mut self) {
        self.phase = match self.phase {
            PlaybackPhase::PlayingSingle => PlaybackPhase::PausedSingle,
            PlaybackPhase::PlayingQueue => PlaybackPhase::PausedQueue,
            other => other,
        };
    }

    pub fn resume(&mut self) {
        self.phase = match self.phase {
            PlaybackPhase::PausedSingle => PlaybackPhase::PlayingSingle,
            PlaybackPhase::PausedQueue => PlaybackPhase::PlayingQueue,
            other => other,
        };
    }

    /// A solo clip finished (or failed, which counts as finished).
    pub fn finish_single(&mut self) {
        self.phase = PlaybackPhase::Idle;
        self.active_slot = None;
    }

    /// The queue run ended. A natural full completion rewinds to the start;
    /// a user stop keeps the index so `resume` restarts at the same item.
    pub fn finish_queue(&mut self, completed: bool) {
        self.phase = PlaybackPhase::Idle;
        self.active_slot = None;
        if completed {
            self.queue_index = 0;
        }
    }

    pub fn set_speed(&mut self, rate: f32) {
        self.speed = rate;
    }

    pub fn set_volume(&mut self, level: f32) {
        self.volume = level.clamp(0.0, 1.0);
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    /// The sink volume implied by volume + mute.
    pub fn effective_volume(&self) -> f32 {
        if self.muted { 0.0 } else { self.volume }
    }
}

impl Default for PlaybackSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Step a queue index by one position with wraparound in either direction.
pub fn wrap_index(index: usize, forward: bool, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    if forward {
        (index + 1) % len
    } else {
        (index + len - 1) % len
    }
}

/// Per-slot resolved durations and live remaining-time entries.
///
/// A duration is absent until the clip's metadata resolves; absent entries
/// contribute nothing to totals. A remaining entry exists only while its
/// slot is actively sounding.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    durations: HashMap<SlotKey, Duration>,
    remaining: HashMap<SlotKey, u64>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        ProgressTracker::default()
    }

    pub fn set_duration(&mut self, key: SlotKey, duration: Duration) {
        self.durations.insert(key, duration);
    }

    pub fn duration(&self, key: &SlotKey) -> Option<Duration> {
        self.durations.get(key).copied()
    }

    /// Duration rounded up to whole seconds, the unit of all aggregate math.
    pub fn duration_secs(&self, key: &SlotKey) -> Option<u64> {
        self.durations
            .get(key)
            .map(|d| d.as_secs_f64().ceil() as u64)
    }

    pub fn clear_duration(&mut self, key: &SlotKey) {
        self.durations.remove(key);
    }

    pub fn set_remaining(&mut self, key: SlotKey, secs: u64) {
        self.remaining.insert(key, secs);
    }

    pub fn remaining(&self, key: &SlotKey) -> Option<u64> {
        self.remaining.get(key).copied()
    }

    pub fn clear_remaining(&mut self, key: &SlotKey) {
        self.remaining.remove(key);
    }

    pub fn clear_all_remaining(&mut self) {
        self.remaining.clear();
    }

    /// Sum of resolved durations across the queue. Unresolved slots are
    /// excluded, never estimated.
    pub fn total_secs(&self, queue: &[SlotKey]) -> u64 {
        queue
            .iter()
            .filter_map(|k| self.duration_secs(k))
            .sum()
    }

    /// Durations of entries strictly before `index`, plus the live elapsed
    /// time of the entry at `index` while it is sounding.
    pub fn elapsed_secs(&self, queue: &[SlotKey], index: usize) -> u64 {
        let done: u64 = queue
            .iter()
            .take(index)
            .filter_map(|k| self.duration_secs(k))
            .sum();
        let current = queue.get(index).map_or(0, |k| {
            match (self.duration_secs(k), self.remaining(k)) {
                (Some(dur), Some(rem)) => dur.saturating_sub(rem),
                _ => 0,
            }
        });
        done + current
    }

    /// Remaining time across the rest of the queue: the live remainder of
    /// the current entry (its full duration when it has not started) plus
    /// the durations after it.
    pub fn remaining_secs(&self, queue: &[SlotKey], index: usize) -> u64 {
        let current = queue.get(index).map_or(0, |k| {
            self.remaining(k)
                .or_else(|| self.duration_secs(k))
                .unwrap_or(0)
        });
        let upcoming: u64 = queue
            .iter()
            .skip(index + 1)
            .filter_map(|k| self.duration_secs(k))
            .sum();
        current + upcoming
    }
}
