//! Headless controller for audio-keepalive.
//!
//! Provides the single entry point the shell talks to: pick a mode, start,
//! stop, and re-apply settings when the preferences change.

mod error;
mod scheduler;
mod settings;
mod wav;

use ka_audio::{AudioOutputEngine, OutputBackend};
use std::sync::Arc;
use tracing::info;

// Re-export common types so callers don't need ka-core/ka-audio directly.
pub use error::{Error, Result};
pub use ka_audio::{AudioError, CpalBackend, EngineStats, SimulatedBackend};
pub use ka_core::{ConfigError, EngineState, IntervalMinutes, PlaybackMode, SchedulingState};
pub use ka_signal::PulsePattern;
pub use scheduler::{PulseConfig, PulseOutcome, PulseScheduler, PulseStats};
pub use settings::{Settings, SettingsError, SettingsStore};
pub use wav::{render_signal, signal_to_wav, write_wav};

/// Owns the output engine and the pulse scheduler and switches between
/// continuous and interval output.
pub struct Controller {
    engine: Arc<AudioOutputEngine>,
    scheduler: PulseScheduler,
    settings: Settings,
}

impl Controller {
    pub fn new(backend: Box<dyn OutputBackend>, settings: Settings) -> Self {
        Self::with_pulse_config(backend, settings, PulseConfig::default())
    }

    pub fn with_pulse_config(
        backend: Box<dyn OutputBackend>,
        settings: Settings,
        config: PulseConfig,
    ) -> Self {
        let engine = Arc::new(AudioOutputEngine::new(backend));
        let scheduler = PulseScheduler::with_config(Arc::downgrade(&engine), config);
        Self {
            engine,
            scheduler,
            settings,
        }
    }

    // --- Queries ---

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn engine(&self) -> &Arc<AudioOutputEngine> {
        &self.engine
    }

    pub fn engine_state(&self) -> EngineState {
        self.engine.state()
    }

    pub fn scheduling_state(&self) -> SchedulingState {
        self.scheduler.state()
    }

    pub fn pulse_stats(&self) -> PulseStats {
        self.scheduler.stats()
    }

    // --- Control ---

    /// Start in the mode given by the current settings.
    pub fn start(&mut self) -> Result<()> {
        let Settings {
            mode,
            interval_minutes,
        } = self.settings;
        self.start_with_mode(mode, interval_minutes)
    }

    /// Continuous: stop any pulse timer and stream directly. Interval: stop
    /// direct streaming and arm the pulse timer.
    ///
    /// If the engine cannot start, it stays stopped and the scheduler stays
    /// idle.
    pub fn start_with_mode(&mut self, mode: PlaybackMode, interval: IntervalMinutes) -> Result<()> {
        match mode {
            PlaybackMode::Continuous => {
                self.scheduler.stop();
                self.engine.start()?;
                info!("continuous keepalive running");
            }
            PlaybackMode::Interval => {
                self.engine.stop();
                self.scheduler.start_with_interval_minutes(interval);
                info!(interval = interval.get(), "interval keepalive running");
            }
        }
        Ok(())
    }

    /// Stop the scheduler and the engine, whatever mode is active.
    pub fn stop(&mut self) {
        self.scheduler.stop();
        self.engine.stop();
    }

    /// Switch to new settings: everything from the old configuration is
    /// stopped before the new one starts.
    pub fn apply_settings(&mut self, settings: &Settings) -> Result<()> {
        info!(
            mode = %settings.mode,
            interval = settings.interval_minutes.get(),
            "applying settings"
        );
        self.stop();
        self.settings = *settings;
        self.start()
    }

    /// Fire one interval pulse right away.
    pub fn trigger_pulse(&self) -> PulseOutcome {
        self.scheduler.trigger_now()
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn interval(minutes: u32) -> Settings {
        Settings {
            mode: PlaybackMode::Interval,
            interval_minutes: IntervalMinutes::new(minutes).unwrap(),
        }
    }

    fn controller(backend: &SimulatedBackend, settings: Settings) -> Controller {
        let config = PulseConfig {
            minute: Duration::from_millis(50),
            pulse_timeout: Duration::from_secs(2),
            poll: Duration::from_millis(1),
        };
        Controller::with_pulse_config(Box::new(backend.clone()), settings, config)
    }

    #[test]
    fn fresh_controller_stop_is_noop() {
        let backend = SimulatedBackend::manual();
        let mut ctrl = controller(&backend, Settings::default());

        ctrl.stop();

        assert_eq!(ctrl.engine_state(), EngineState::Stopped);
        assert_eq!(ctrl.scheduling_state(), SchedulingState::Idle);
        assert_eq!(backend.opened_devices(), 0);
    }

    #[test]
    fn continuous_mode_plays_directly() {
        let backend = SimulatedBackend::manual();
        let mut ctrl = controller(&backend, Settings::default());

        ctrl.start().unwrap();

        assert_eq!(ctrl.engine_state(), EngineState::Playing);
        assert_eq!(ctrl.scheduling_state(), SchedulingState::Idle);
    }

    #[test]
    fn interval_mode_arms_scheduler_only() {
        let backend = SimulatedBackend::manual();
        let mut ctrl = controller(&backend, interval(15));

        ctrl.start().unwrap();

        assert_eq!(ctrl.engine_state(), EngineState::Stopped);
        assert_eq!(ctrl.scheduling_state(), SchedulingState::Scheduling);
    }

    #[test]
    fn device_failure_leaves_everything_stopped() {
        let backend = SimulatedBackend::manual();
        backend.fail_open(true);
        let mut ctrl = controller(&backend, Settings::default());

        let err = ctrl.start().unwrap_err();

        assert!(matches!(err, Error::DeviceUnavailable(AudioError::NoDevice)));
        assert_eq!(ctrl.engine_state(), EngineState::Stopped);
        assert_eq!(ctrl.scheduling_state(), SchedulingState::Idle);
        assert_eq!(ctrl.engine().live_buffers(), 0);
    }

    #[test]
    fn continuous_to_interval_never_overlaps() {
        let backend = SimulatedBackend::manual();
        let mut ctrl = controller(&backend, Settings::default());
        ctrl.start().unwrap();

        ctrl.apply_settings(&interval(5)).unwrap();

        assert_eq!(ctrl.engine_state(), EngineState::Stopped);
        assert_eq!(ctrl.scheduling_state(), SchedulingState::Scheduling);
        assert_eq!(ctrl.settings().mode, PlaybackMode::Interval);
        assert_eq!(backend.live_devices(), 0);
    }

    #[test]
    fn interval_to_continuous_disarms_scheduler() {
        let backend = SimulatedBackend::manual();
        let mut ctrl = controller(&backend, interval(10));
        ctrl.start().unwrap();

        ctrl.apply_settings(&Settings::default()).unwrap();

        assert_eq!(ctrl.engine_state(), EngineState::Playing);
        assert_eq!(ctrl.scheduling_state(), SchedulingState::Idle);
    }

    #[test]
    fn failed_apply_can_be_retried() {
        let backend = SimulatedBackend::manual();
        let mut ctrl = controller(&backend, interval(5));
        ctrl.start().unwrap();

        backend.fail_open(true);
        assert!(ctrl.apply_settings(&Settings::default()).is_err());
        assert_eq!(ctrl.engine_state(), EngineState::Stopped);
        assert_eq!(ctrl.scheduling_state(), SchedulingState::Idle);

        backend.fail_open(false);
        ctrl.apply_settings(&Settings::default()).unwrap();
        assert_eq!(ctrl.engine_state(), EngineState::Playing);
    }

    #[test]
    fn stop_shuts_down_both() {
        let backend = SimulatedBackend::manual();
        let mut ctrl = controller(&backend, interval(5));
        ctrl.start().unwrap();
        ctrl.stop();
        assert_eq!(ctrl.scheduling_state(), SchedulingState::Idle);

        ctrl.start_with_mode(PlaybackMode::Continuous, IntervalMinutes::default())
            .unwrap();
        ctrl.stop();
        ctrl.stop();
        assert_eq!(ctrl.engine_state(), EngineState::Stopped);
        assert_eq!(ctrl.engine().live_buffers(), 0);
    }

    #[test]
    fn manual_pulse_while_continuous_is_busy() {
        let backend = SimulatedBackend::manual();
        let mut ctrl = controller(&backend, Settings::default());
        ctrl.start().unwrap();
        assert_eq!(ctrl.trigger_pulse(), PulseOutcome::EngineBusy);
    }

    #[test]
    fn dropping_controller_releases_device() {
        let backend = SimulatedBackend::manual();
        let mut ctrl = controller(&backend, Settings::default());
        ctrl.start().unwrap();
        drop(ctrl);
        assert_eq!(backend.live_devices(), 0);
    }
}
