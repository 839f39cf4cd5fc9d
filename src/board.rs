use crate::clip::default_assignment;
use crate::line::Line;
use crate::slot::{AudioAssignment, SlotKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The engine-owned assignment state: which clip is bound to each slot key,
/// and the ordered extra-segment lists nested under between slots.
///
/// The board keeps every assignment it has ever been given — slots that are
/// unreachable from the currently selected line stay in memory, invisible to
/// the queue, and come back unchanged when their line is selected again.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SlotBoard {
    assignments: BTreeMap<SlotKey, AudioAssignment>,
    extra_segments: BTreeMap<SlotKey, Vec<SlotKey>>,
}

impl SlotBoard {
    pub fn new() -> Self {
        SlotBoard::default()
    }

    pub fn assignment(&self, key: &SlotKey) -> Option<&AudioAssignment> {
        self.assignments.get(key)
    }

    pub fn is_assigned(&self, key: &SlotKey) -> bool {
        self.assignments.contains_key(key)
    }

    /// All assignments, in key order.
    pub fn assignments(&self) -> impl Iterator<Item = (&SlotKey, &AudioAssignment)> {
        self.assignments.iter()
    }

    /// Bind a clip to a slot, returning the displaced assignment (if any) so
    /// the caller can release its resource after the swap.
    pub fn bind(&mut self, key: SlotKey, assignment: AudioAssignment) -> Option<AudioAssignment> {
        self.assignments.insert(key, assignment)
    }

    /// Remove a slot's assignment, returning it for resource release.
    pub fn unbind(&mut self, key: &SlotKey) -> Option<AudioAssignment> {
        self.assignments.remove(key)
    }

    /// Append a fresh extra segment under a between slot. Returns `None`
    /// (no-op) when the key is not a between slot of an adjacent pair on the
    /// current line.
    pub fn add_extra_segment(&mut self, line: &Line, between: &SlotKey) -> Option<SlotKey> {
        let (a, b) = match between {
            SlotKey::Between(a, b) if line.are_adjacent(a, b) => (a.clone(), b.clone()),
            _ => return None,
        };
        let list = self.extra_segments.entry(between.clone()).or_default();
        // Creation order is the list order; the timestamp only has to be
        // unique within this list for the key to be stable.
        let mut millis = chrono::Utc::now().timestamp_millis();
        while list.iter().any(|k| matches!(k, SlotKey::Segment(_, _, t) if *t == millis)) {
            millis += 1;
        }
        let key = SlotKey::segment(&a, &b, millis);
        list.push(key.clone());
        Some(key)
    }

    /// Remove an extra segment from its between slot's list and unbind it.
    /// Returns the unbound assignment for resource release.
    pub fn remove_extra_segment(
        &mut self,
        between: &SlotKey,
        segment: &SlotKey,
    ) -> Option<AudioAssignment> {
        if let Some(list) = self.extra_segments.get_mut(between) {
            list.retain(|k| k != segment);
            if list.is_empty() {
                self.extra_segments.remove(between);
            }
        }
        self.assignments.remove(segment)
    }

    /// The ordered extra segments of a between slot.
    pub fn extra_segments_of(&self, between: &SlotKey) -> &[SlotKey] {
        self.extra_segments
            .get(between)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Reconcile the board against a newly selected line: assignments whose
    /// keys resolve against `line` are kept unchanged; every other reachable
    /// station/between slot is seeded with a rotating default clip so the
    /// line starts fully populated. Unreachable assignments are retained but
    /// not touched.
    pub fn reconcile_for_line(&mut self, line: &Line) {
        let mut position = 0usize;
        let raw = &line.stations;
        let is_loop = line.is_loop();
        for i in 0..raw.len() {
            if !(is_loop && i + 1 == raw.len()) {
                let key = SlotKey::station(&raw[i]);
                self.assignments
                    .entry(key)
                    .or_insert_with(|| default_assignment(position));
                position += 1;
            }
            if i + 1 < raw.len() {
                let key = SlotKey::between(&raw[i], &raw[i + 1]);
                self.assignments
                    .entry(key)
                    .or_insert_with(|| default_assignment(position));
                position += 1;
            }
        }
    }

    /// True when `key` resolves against `line`'s current stations.
    pub fn key_reachable(line: &Line, key: &SlotKey) -> bool {
        match key {
            SlotKey::Station(id) => line.visits(id),
            SlotKey::Between(a, b) | SlotKey::Segment(a, b, _) => line.are_adjacent(a, b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn line_of(ids: &[&str]) -> Line {
        Line::new("Test", ids.iter().map(|s| s.to_string()).collect())
    }

    fn upload(name: &str) -> AudioAssignment {
        AudioAssignment::upload(format!("clip://{}", name), name)
    }

    #[test]
    fn bind_returns_displaced_assignment() {
        let mut board = SlotBoard::new();
        let key = SlotKey::station("a");
        assert!(board.bind(key.clone(), upload("first")).is_none());
        let displaced = board.bind(key.clone(), upload("second")).unwrap();
        assert_eq!(displaced.display_name, "first");
        assert_eq!(board.assignment(&key).unwrap().display_name, "second");
    }

    #[test]
    fn extra_segments_keep_creation_order() {
        let mut board = SlotBoard::new();
        let line = line_of(&["a", "b"]);
        let between = SlotKey::between("a", "b");
        let s1 = board.add_extra_segment(&line, &between).unwrap();
        let s2 = board.add_extra_segment(&line, &between).unwrap();
        assert_ne!(s1, s2);
        assert_eq!(board.extra_segments_of(&between), [s1.clone(), s2.clone()]);

        // Removing the first leaves the second in place, not re-indexed.
        board.remove_extra_segment(&between, &s1);
        assert_eq!(board.extra_segments_of(&between), [s2]);
    }

    #[test]
    fn add_segment_rejects_non_adjacent_pair() {
        let mut board = SlotBoard::new();
        let line = line_of(&["a", "b", "c"]);
        assert!(board.add_extra_segment(&line, &SlotKey::between("a", "c")).is_none());
        assert!(board.add_extra_segment(&line, &SlotKey::station("a")).is_none());
    }

    #[test]
    fn remove_segment_returns_assignment_for_release() {
        let mut board = SlotBoard::new();
        let line = line_of(&["a", "b"]);
        let between = SlotKey::between("a", "b");
        let seg = board.add_extra_segment(&line, &between).unwrap();
        board.bind(seg.clone(), upload("seg"));
        let removed = board.remove_extra_segment(&between, &seg).unwrap();
        assert_eq!(removed.display_name, "seg");
        assert!(!board.is_assigned(&seg));
    }

    #[test]
    fn reconcile_seeds_every_line_slot() {
        let mut board = SlotBoard::new();
        let line = line_of(&["a", "b", "c"]);
        board.reconcile_for_line(&line);
        // 3 stations + 2 between slots.
        assert_eq!(board.assignments().count(), 5);
        assert!(board.is_assigned(&SlotKey::station("a")));
        assert!(board.is_assigned(&SlotKey::between("b", "c")));
    }

    #[test]
    fn reconcile_keeps_existing_and_unreachable_assignments() {
        let mut board = SlotBoard::new();
        let key = SlotKey::station("a");
        board.bind(key.clone(), upload("mine"));
        board.bind(SlotKey::station("zz"), upload("other-line"));

        board.reconcile_for_line(&line_of(&["a", "b"]));
        assert_eq!(board.assignment(&key).unwrap().display_name, "mine");
        assert!(board.is_assigned(&SlotKey::station("zz")));
    }

    #[test]
    fn reconcile_loop_line_skips_duplicate_terminus() {
        let mut board = SlotBoard::new();
        let line = line_of(&["a", "b", "a"]);
        board.reconcile_for_line(&line);
        // Stations a, b plus betweens (a,b) and (b,a).
        assert_eq!(board.assignments().count(), 4);
        assert!(board.is_assigned(&SlotKey::between("b", "a")));
    }

    #[test]
    fn reachability_follows_the_line() {
        let line = line_of(&["a", "b", "c"]);
        assert!(SlotBoard::key_reachable(&line, &SlotKey::station("b")));
        assert!(SlotBoard::key_reachable(&line, &SlotKey::between("a", "b")));
        assert!(!SlotBoard::key_reachable(&line, &SlotKey::between("a", "c")));
        assert!(!SlotBoard::key_reachable(&line, &SlotKey::station("x")));
        assert!(SlotBoard::key_reachable(&line, &SlotKey::segment("b", "c", 5)));
    }

    #[test]
    fn board_state_round_trips_through_json() {
        let mut board = SlotBoard::new();
        let line = line_of(&["a", "b"]);
        board.reconcile_for_line(&line);
        let between = SlotKey::between("a", "b");
        let seg = board.add_extra_segment(&line, &between).unwrap();
        board.bind(
            seg.clone(),
            AudioAssignment::preset(PathBuf::from("x.mp3"), "X"),
        );

        let json = serde_json::to_string(&board).unwrap();
        let back: SlotBoard = serde_json::from_str(&json).unwrap();
        assert_eq!(back.assignments().count(), board.assignments().count());
        assert_eq!(back.extra_segments_of(&between), [seg]);
    }
}
