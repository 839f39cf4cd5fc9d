use serde::{Deserialize, Serialize};

/// Identifier of a station as assigned by the map editor.
pub type StationId = String;

/// A station as seen by the engine. Identity is owned by the external map
/// model; the engine only reads `id` and `name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Station {
    pub id: StationId,
    pub name: String,
    pub position: (f32, f32),
}

impl Station {
    pub fn new(id: &str, name: &str) -> Self {
        Station {
            id: id.to_string(),
            name: name.to_string(),
            position: (0.0, 0.0),
        }
    }
}

/// An ordered traversal of station ids. A loop line repeats its first id at
/// the end; traversal helpers deduplicate the repeated terminus.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Line {
    pub name: String,
    pub stations: Vec<StationId>,
}

impl Line {
    pub fn new(name: &str, stations: Vec<StationId>) -> Self {
        Line {
            name: name.to_string(),
            stations,
        }
    }

    /// True when the line closes on itself (first id repeated at the end).
    pub fn is_loop(&self) -> bool {
        self.stations.len() >= 2 && self.stations.first() == self.stations.last()
    }

    /// Station ids in visit order, with a loop's repeated terminus dropped.
    pub fn visited_stations(&self) -> &[StationId] {
        if self.is_loop() {
            &self.stations[..self.stations.len() - 1]
        } else {
            &self.stations
        }
    }

    /// Consecutive station pairs in line order. For a loop this includes the
    /// closing pair back to the first station.
    pub fn adjacent_pairs(&self) -> Vec<(&StationId, &StationId)> {
        self.stations
            .windows(2)
            .map(|w| (&w[0], &w[1]))
            .collect()
    }

    /// True if `id` is visited by this line.
    pub fn visits(&self, id: &str) -> bool {
        self.visited_stations().iter().any(|s| s == id)
    }

    /// True if `a` directly precedes `b` somewhere on this line.
    pub fn are_adjacent(&self, a: &str, b: &str) -> bool {
        self.adjacent_pairs().iter().any(|(x, y)| *x == a && *y == b)
    }
}
