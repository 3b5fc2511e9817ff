use serde::{Deserialize, Serialize};

/// Size and count accounting for one load cycle.
///
/// `initial_*` are captured once after a successful load. The remaining size
/// counts bytes still pending, that is queued or parked in the error list, and
/// never exceeds the initial total.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressModel {
    initial_total_size: u64,
    initial_item_count: u64,
    actual_remaining_size: u64,
}

impl ProgressModel {
    pub fn capture(&mut self, total_size: u64, item_count: u64) {
        self.initial_total_size = total_size;
        self.initial_item_count = item_count;
        self.actual_remaining_size = total_size;
    }

    pub fn consume(&mut self, size: u64) {
        self.actual_remaining_size = self.actual_remaining_size.saturating_sub(size);
    }

    pub fn recompute(&mut self, pending_size: u64) {
        self.actual_remaining_size = pending_size.min(self.initial_total_size);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn initial_total_size(&self) -> u64 {
        self.initial_total_size
    }

    pub fn initial_item_count(&self) -> u64 {
        self.initial_item_count
    }

    pub fn actual_remaining_size(&self) -> u64 {
        self.actual_remaining_size
    }

    pub fn completed_size(&self) -> u64 {
        self.initial_total_size.saturating_sub(self.actual_remaining_size)
    }

    pub fn fraction_done(&self) -> f64 {
        if self.initial_total_size == 0 {
            return 0.0;
        }
        self.completed_size() as f64 / self.initial_total_size as f64
    }
}

#[cfg(test)]
mod tests {
    use super::ProgressModel;

    #[test]
    fn capture_then_consume_never_underflows() {
        let mut progress = ProgressModel::default();
        progress.capture(35, 3);
        assert_eq!(progress.actual_remaining_size(), 35);

        progress.consume(10);
        progress.consume(30);
        assert_eq!(progress.actual_remaining_size(), 0);
        assert_eq!(progress.completed_size(), 35);
        assert_eq!(progress.initial_item_count(), 3);
    }

    #[test]
    fn recompute_is_capped_by_initial_total() {
        let mut progress = ProgressModel::default();
        progress.capture(20, 2);
        progress.recompute(50);
        assert_eq!(progress.actual_remaining_size(), 20);
        progress.recompute(5);
        assert_eq!(progress.actual_remaining_size(), 5);
        assert!((progress.fraction_done() - 0.75).abs() < f64::EPSILON);

        progress.reset();
        assert_eq!(progress, ProgressModel::default());
        assert_eq!(progress.fraction_done(), 0.0);
    }
}
