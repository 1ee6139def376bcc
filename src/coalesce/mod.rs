//! Merges concurrent signals from multiple physical sources into one
//! representative value per virtual target: an OR-combine for buttons and
//! a priority/last-wins pick for hat axes.
use std::collections::HashMap;
use std::time::Instant;

/// Reference-counts presses per virtual key across however many physical
/// sources are mapped to it, emitting a press/release only on the 0->1 and
/// 1->0 transitions.
#[derive(Debug, Default)]
pub struct ButtonCoalescer {
    counts: HashMap<u16, i32>,
}

impl ButtonCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `Some(true)` on a rising edge, `Some(false)` on a falling
    /// edge, `None` when the transition doesn't change the coalesced
    /// state. The counter is clamped at zero so a spurious release can
    /// never drive it negative.
    pub fn update(&mut self, vcode: u16, pressed: bool) -> Option<bool> {
        let count = self.counts.entry(vcode).or_insert(0);
        if pressed {
            *count += 1;
            if *count == 1 {
                return Some(true);
            }
        } else {
            *count = (*count - 1).max(0);
            if *count == 0 {
                return Some(false);
            }
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HatMode {
    Priority,
    Last,
}

/// Picks a representative value for a hat axis driven by more than one
/// physical source, either by declaration-order priority or by most
/// recent change.
#[derive(Debug)]
pub struct HatCoalescer {
    mode: HatMode,
    order: HashMap<u16, Vec<u16>>,
    states: HashMap<(u16, u16), (i8, Instant)>,
    emitted: HashMap<u16, i8>,
}

impl HatCoalescer {
    pub fn new(mode: HatMode) -> Self {
        Self {
            mode,
            order: HashMap::new(),
            states: HashMap::new(),
            emitted: HashMap::new(),
        }
    }

    /// Registers `source` as participating in `vcode`'s hat in the order
    /// it was declared in the mapping file; priority mode scans in this
    /// order.
    pub fn register_source(&mut self, vcode: u16, source: u16) {
        let order = self.order.entry(vcode).or_default();
        if !order.contains(&source) {
            order.push(source);
        }
    }

    /// Feeds a new tri-valued reading from `source` for `vcode`'s hat and
    /// returns `Some(value)` if the coalesced representative value
    /// changed.
    pub fn update(&mut self, vcode: u16, source: u16, value: i8, now: Instant) -> Option<i8> {
        self.states.insert((vcode, source), (value, now));
        let representative = match self.mode {
            HatMode::Priority => self.pick_priority(vcode),
            HatMode::Last => self.pick_last(vcode),
        };
        let previous = self.emitted.insert(vcode, representative);
        if previous == Some(representative) {
            None
        } else {
            Some(representative)
        }
    }

    fn pick_priority(&self, vcode: u16) -> i8 {
        let Some(order) = self.order.get(&vcode) else {
            return 0;
        };
        for source in order {
            if let Some((value, _)) = self.states.get(&(vcode, *source)) {
                if *value != 0 {
                    return *value;
                }
            }
        }
        0
    }

    fn pick_last(&self, vcode: u16) -> i8 {
        let Some(order) = self.order.get(&vcode) else {
            return 0;
        };
        order
            .iter()
            .filter_map(|source| self.states.get(&(vcode, *source)))
            .filter(|(value, _)| *value != 0)
            .max_by_key(|(_, ts)| *ts)
            .map(|(value, _)| *value)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn button_or_coalesces_two_sources() {
        let mut c = ButtonCoalescer::new();
        assert_eq!(c.update(1, true), Some(true)); // A down
        assert_eq!(c.update(1, true), None); // B down
        assert_eq!(c.update(1, false), None); // A up
        assert_eq!(c.update(1, false), Some(false)); // B up
    }

    #[test]
    fn button_count_never_goes_negative() {
        let mut c = ButtonCoalescer::new();
        assert_eq!(c.update(1, false), None);
        assert_eq!(c.update(1, true), Some(true));
    }

    #[test]
    fn hat_priority_prefers_first_declared_nonzero() {
        let mut c = HatCoalescer::new(HatMode::Priority);
        c.register_source(10, 0); // A
        c.register_source(10, 1); // B
        let t0 = Instant::now();
        assert_eq!(c.update(10, 0, 1, t0), Some(1)); // A=+1
        assert_eq!(c.update(10, 1, -1, t0), None); // B=-1, A still wins
        assert_eq!(c.update(10, 0, 0, t0), Some(-1)); // A falls to 0, B wins
    }

    #[test]
    fn hat_last_prefers_most_recent_change() {
        let mut c = HatCoalescer::new(HatMode::Last);
        c.register_source(10, 0);
        c.register_source(10, 1);
        let t0 = Instant::now();
        let t1 = t0 + std::time::Duration::from_millis(1);
        assert_eq!(c.update(10, 0, 1, t0), Some(1));
        assert_eq!(c.update(10, 1, -1, t1), Some(-1));
    }

    #[test]
    fn hat_emits_only_on_change() {
        let mut c = HatCoalescer::new(HatMode::Priority);
        c.register_source(10, 0);
        let t0 = Instant::now();
        assert_eq!(c.update(10, 0, 1, t0), Some(1));
        assert_eq!(c.update(10, 0, 1, t0), None);
    }
}
