use std::collections::HashMap;

/// Last known watched-condition flag per entity.
///
/// Only the most recent observation is kept. An entity that has never been
/// observed has no record, and its first observation never counts as an edge,
/// so a restart does not alert for accounts that were already in game.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    last: HashMap<String, bool>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `flag` for `entity_id`. Returns `true` on a `false → true` edge.
    pub fn observe(&mut self, entity_id: &str, flag: bool) -> bool {
        match self.last.insert(entity_id.to_string(), flag) {
            Some(previous) => !previous && flag,
            None => false,
        }
    }

    pub fn last_known(&self, entity_id: &str) -> Option<bool> {
        self.last.get(entity_id).copied()
    }

    pub fn len(&self) -> usize {
        self.last.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rising_edges_only() {
        let mut tracker = PresenceTracker::new();
        let fired: Vec<usize> = [false, true, true, false, true]
            .into_iter()
            .enumerate()
            .filter_map(|(i, flag)| tracker.observe("76561198000000001", flag).then_some(i))
            .collect();
        assert_eq!(fired, [1, 4]);
    }

    #[test]
    fn first_observation_is_silent() {
        let mut tracker = PresenceTracker::new();
        assert!(!tracker.observe("a", true));
        assert_eq!(tracker.last_known("a"), Some(true));
        assert!(!tracker.observe("a", true));
    }

    #[test]
    fn entities_are_independent() {
        let mut tracker = PresenceTracker::new();
        tracker.observe("a", false);
        tracker.observe("b", true);
        assert!(tracker.observe("a", true));
        assert!(!tracker.observe("b", true));
        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.last_known("c"), None);
    }
}
