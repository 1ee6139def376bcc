//! Per-source axis range tracking and the piecewise-linear rescale that
//! maps a physical axis onto its virtual counterpart through a slowly
//! drifting estimated center.
const CENTER_QUIET_BAND: f64 = 0.025;
const CENTER_EMA_ALPHA: f64 = 0.02;

/// Tracks the observed range and a drifting center estimate for one
/// physical `(role, source_code)` axis.
#[derive(Debug, Clone, Copy)]
pub struct AxisTracker {
    pub min: i32,
    pub max: i32,
    center: f64,
}

impl AxisTracker {
    pub fn new(min: i32, max: i32) -> Self {
        Self {
            min,
            max,
            center: ((min + max) / 2) as f64,
        }
    }

    /// Mirrors a raw reading around the tracked range's midpoint, used
    /// when a mapping row carries the `reverse` option.
    pub fn reverse_raw(&self, raw: i32) -> i32 {
        self.min + self.max - raw
    }

    /// Folds a new raw reading into the center estimate: only while the
    /// reading sits within 2.5% of the full range around the current
    /// center does it nudge the estimate, via an EMA with alpha=0.02.
    /// This keeps the center stable through active steering and lets it
    /// drift to compensate only for quiescent-position creep.
    fn observe(&mut self, raw: i32) {
        let span = (self.max - self.min) as f64;
        if span <= 0.0 {
            return;
        }
        if (raw as f64 - self.center).abs() <= CENTER_QUIET_BAND * span {
            self.center += CENTER_EMA_ALPHA * (raw as f64 - self.center);
        }
    }

    /// Rescales `raw` onto `[vmin, vmax]` through the two-segment linear
    /// map pivoting on the tracked center, updating the center estimate
    /// as a side effect.
    pub fn rescale(&mut self, raw: i32, vmin: i32, vmax: i32, vcenter: i32) -> i32 {
        self.observe(raw);
        let raw = raw as f64;
        let center = self.center;
        let out = if raw >= center {
            let span = self.max as f64 - center;
            if span <= 0.0 {
                vcenter as f64
            } else {
                vcenter as f64 + (raw - center) / span * (vmax - vcenter) as f64
            }
        } else {
            let span = center - self.min as f64;
            if span <= 0.0 {
                vcenter as f64
            } else {
                vcenter as f64 + (raw - center) / span * (vcenter - vmin) as f64
            }
        };
        out.round().clamp(vmin as f64, vmax as f64) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_at_center_maps_to_virtual_center() {
        let mut tracker = AxisTracker::new(0, 1023);
        for _ in 0..5 {
            assert_eq!(tracker.rescale(511, -32768, 32767, 0), 0);
        }
    }

    #[test]
    fn extremes_map_to_virtual_extremes() {
        let mut tracker = AxisTracker::new(0, 1023);
        tracker.rescale(511, -32768, 32767, 0);
        assert_eq!(tracker.rescale(1023, -32768, 32767, 0), 32767);
        assert_eq!(tracker.rescale(0, -32768, 32767, 0), -32768);
    }

    #[test]
    fn rescale_is_monotonic() {
        let mut tracker = AxisTracker::new(0, 1023);
        let mut last = i32::MIN;
        for raw in (0..=1023).step_by(17) {
            let out = tracker.rescale(raw, -32768, 32767, 0);
            assert!(out >= last);
            last = out;
        }
    }

    #[test]
    fn reverse_mirrors_around_midpoint() {
        let tracker = AxisTracker::new(0, 1023);
        assert_eq!(tracker.reverse_raw(0), 1023);
        assert_eq!(tracker.reverse_raw(1023), 0);
        assert_eq!(tracker.reverse_raw(511), 512);
    }

    #[test]
    fn quiescent_center_drifts_toward_repeated_offset_reading() {
        let mut tracker = AxisTracker::new(0, 1000);
        // Feed a steady reading inside the 2.5%-of-span quiet band around
        // the initial center (500) so the EMA pulls the center toward it.
        for _ in 0..500 {
            tracker.rescale(520, -100, 100, 0);
        }
        // The original center (500) is now below the drifted center, so it
        // should read as a small negative output instead of exactly zero.
        let at_old_center = tracker.rescale(500, -100, 100, 0);
        assert!(at_old_center < 0);
    }
}
