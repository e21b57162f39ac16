//! Bring the persisted epoch directory in line with the configured schedule.

use ember_engine::{Engine, Store};

use crate::config::EpochConfig;

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    /// A persisted epoch differs from the configured one at the same position.
    #[error("epoch {index} is persisted as [{stored_start}, {stored_end}) but configured as [{start}, {end})")]
    Mismatch {
        index: usize,
        stored_start: u64,
        stored_end: u64,
        start: u64,
        end: u64,
    },

    /// The database holds more epochs than the configuration lists.
    #[error("database holds {stored} epochs, configuration lists {configured}")]
    Truncated { stored: usize, configured: usize },

    #[error(transparent)]
    Accrual(#[from] ember_engine::AccrualError),
}

/// Append configured epochs that are not persisted yet. Returns how many
/// were appended. Persisted epochs are immutable and must match.
pub fn apply<S: Store>(engine: &mut Engine<S>, schedule: &[EpochConfig]) -> Result<usize, ScheduleError> {
    let stored = engine.epochs()?;
    if stored.len() > schedule.len() {
        return Err(ScheduleError::Truncated {
            stored: stored.len(),
            configured: schedule.len(),
        });
    }
    for (index, (epoch, config)) in stored.iter().zip(schedule).enumerate() {
        if epoch.start != config.start || epoch.end != config.end {
            return Err(ScheduleError::Mismatch {
                index,
                stored_start: epoch.start,
                stored_end: epoch.end,
                start: config.start,
                end: config.end,
            });
        }
    }

    let mut appended = 0;
    for config in &schedule[stored.len()..] {
        engine.configure_epoch(config.start, config.end, &config.rate_configs())?;
        appended += 1;
    }
    if appended > 0 {
        tracing::info!(appended, total = schedule.len(), "epoch schedule extended");
    }
    Ok(appended)
}
