//! Learning Rate Schedule
//!
//! Step decay with a frozen tail, as a pure function of the epoch and the
//! configured base rate / drop interval.

/// Learning rate for an epoch.
///
/// Divides `base_lr` by 10 every `drop_interval` epochs while the epoch is
/// below 350, then freezes at `base_lr * 0.1^3` for the remainder of the
/// run.
pub fn learning_rate(epoch: usize, base_lr: f64, drop_interval: usize) -> f64 {
    if epoch < 350 {
        base_lr * 0.1f64.powi((epoch / drop_interval) as i32)
    } else {
        base_lr * 0.1f64.powi(3)
    }
}
