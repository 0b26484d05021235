//! Interval pulses.
//!
//! Instead of streaming forever, interval mode wakes up every N minutes,
//! starts the output engine, lets it play until the device has finished at
//! least one full buffer, and stops it again.
//!
//! The scheduler only holds a `Weak` reference to the engine. Each step of a
//! pulse upgrades it briefly; if the engine has been dropped the firing does
//! nothing.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use ka_audio::AudioOutputEngine;
use ka_core::{IntervalMinutes, SchedulingState};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Timing knobs for the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PulseConfig {
    /// Length of one "minute" of interval. 60 s outside of tests.
    pub minute: Duration,
    /// Longest a pulse waits for the device to finish a buffer.
    pub pulse_timeout: Duration,
    /// How often a pulse checks for a finished buffer.
    pub poll: Duration,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            minute: Duration::from_secs(60),
            pulse_timeout: Duration::from_secs(3),
            poll: Duration::from_millis(10),
        }
    }
}

/// What a single firing did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PulseOutcome {
    /// Engine was started and stopped again. `completed` is false when the
    /// pulse timed out or was cancelled before a buffer finished.
    Pulsed { completed: bool },
    /// Another pulse was still in flight.
    Skipped,
    /// Engine was already playing (continuous output), nothing to do.
    EngineBusy,
    /// Engine no longer exists.
    EngineGone,
    /// Engine failed to start; retried on the next firing.
    StartFailed,
}

/// Counters since the scheduler was created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PulseStats {
    pub firings: u64,
    pub pulses: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Periodically pulses an [`AudioOutputEngine`] it does not own.
pub struct PulseScheduler {
    driver: Arc<PulseDriver>,
    timer: Option<Timer>,
}

struct Timer {
    interval: IntervalMinutes,
    cancel: Sender<()>,
    cancelled: Receiver<()>,
    thread: JoinHandle<()>,
}

struct PulseDriver {
    engine: Weak<AudioOutputEngine>,
    config: PulseConfig,
    in_flight: AtomicBool,
    firings: AtomicU64,
    pulses: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl PulseScheduler {
    pub fn new(engine: Weak<AudioOutputEngine>) -> Self {
        Self::with_config(engine, PulseConfig::default())
    }

    pub fn with_config(engine: Weak<AudioOutputEngine>, config: PulseConfig) -> Self {
        Self {
            driver: Arc::new(PulseDriver {
                engine,
                config,
                in_flight: AtomicBool::new(false),
                firings: AtomicU64::new(0),
                pulses: AtomicU64::new(0),
                skipped: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
            timer: None,
        }
    }

    pub fn state(&self) -> SchedulingState {
        if self.timer.is_some() {
            SchedulingState::Scheduling
        } else {
            SchedulingState::Idle
        }
    }

    /// Interval of the armed timer, if any.
    pub fn interval(&self) -> Option<IntervalMinutes> {
        self.timer.as_ref().map(|t| t.interval)
    }

    pub fn config(&self) -> PulseConfig {
        self.driver.config
    }

    pub fn stats(&self) -> PulseStats {
        self.driver.stats()
    }

    /// Arm a repeating timer. Replaces any timer already running.
    pub fn start_with_interval_minutes(&mut self, minutes: IntervalMinutes) {
        self.stop();

        let period = minutes
            .period(self.driver.config.minute)
            .max(Duration::from_millis(1));
        let (cancel, cancelled) = crossbeam_channel::bounded(0);
        let driver = self.driver.clone();
        let timer_cancelled = cancelled.clone();
        let thread = std::thread::spawn(move || timer_thread(driver, period, timer_cancelled));

        self.timer = Some(Timer {
            interval: minutes,
            cancel,
            cancelled,
            thread,
        });
        info!(interval = minutes.get(), ?period, "pulse scheduler armed");
    }

    /// Cancel the timer. An in-flight pulse is cut short and has stopped the
    /// engine by the time this returns. Idempotent.
    pub fn stop(&mut self) {
        let Some(timer) = self.timer.take() else {
            return;
        };
        drop(timer.cancel);
        if timer.thread.join().is_err() {
            error!("pulse timer thread panicked");
        }
        info!(interval = timer.interval.get(), "pulse scheduler stopped");
    }

    /// Fire once on the calling thread, following the same rules as a timer
    /// firing.
    pub fn trigger_now(&self) -> PulseOutcome {
        match &self.timer {
            Some(timer) => self.driver.fire(&timer.cancelled),
            None => {
                let (_hold, never) = crossbeam_channel::bounded(0);
                self.driver.fire(&never)
            }
        }
    }
}

impl Drop for PulseScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn timer_thread(driver: Arc<PulseDriver>, period: Duration, cancelled: Receiver<()>) {
    let mut deadline = Instant::now() + period;
    loop {
        match cancelled.recv_deadline(deadline) {
            Err(RecvTimeoutError::Timeout) => {
                driver.fire(&cancelled);
                deadline += period;

                // A pulse that overran the period coalesces the missed
                // firings into the next one.
                let now = Instant::now();
                if deadline <= now {
                    let behind = (now - deadline).as_nanos() / period.as_nanos() + 1;
                    deadline += period * behind as u32;
                    driver.skipped.fetch_add(behind as u64, Ordering::AcqRel);
                    debug!(missed = behind as u64, "coalesced overdue firings");
                }
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

impl PulseDriver {
    fn stats(&self) -> PulseStats {
        PulseStats {
            firings: self.firings.load(Ordering::Acquire),
            pulses: self.pulses.load(Ordering::Acquire),
            skipped: self.skipped.load(Ordering::Acquire),
            failed: self.failed.load(Ordering::Acquire),
        }
    }

    fn fire(&self, cancelled: &Receiver<()>) -> PulseOutcome {
        self.firings.fetch_add(1, Ordering::AcqRel);
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.skipped.fetch_add(1, Ordering::AcqRel);
            debug!("pulse still in flight, skipping firing");
            return PulseOutcome::Skipped;
        }

        let outcome = self.pulse(cancelled);
        self.in_flight.store(false, Ordering::Release);
        outcome
    }

    fn pulse(&self, cancelled: &Receiver<()>) -> PulseOutcome {
        let Some(engine) = self.engine.upgrade() else {
            debug!("engine dropped, firing ignored");
            return PulseOutcome::EngineGone;
        };
        if engine.is_playing() {
            debug!("engine already playing, firing ignored");
            return PulseOutcome::EngineBusy;
        }

        let baseline = engine.buffers_completed();
        if let Err(err) = engine.start() {
            self.failed.fetch_add(1, Ordering::AcqRel);
            warn!("keepalive pulse failed to start: {}", err);
            return PulseOutcome::StartFailed;
        }
        drop(engine);

        let completed = self.wait_for_buffer(baseline, cancelled);

        if let Some(engine) = self.engine.upgrade() {
            engine.stop();
        }
        self.pulses.fetch_add(1, Ordering::AcqRel);
        debug!(completed, "keepalive pulse done");
        PulseOutcome::Pulsed { completed }
    }

    /// Wait until the engine reports a finished buffer past `baseline`.
    fn wait_for_buffer(&self, baseline: u64, cancelled: &Receiver<()>) -> bool {
        let deadline = Instant::now() + self.config.pulse_timeout;
        loop {
            match self.engine.upgrade() {
                Some(engine) if engine.buffers_completed() > baseline => return true,
                Some(_) => {}
                None => return false,
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(timeout = ?self.config.pulse_timeout, "no buffer finished during pulse");
                return false;
            }
            match cancelled.recv_timeout(self.config.poll.min(deadline - now)) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ka_audio::SimulatedBackend;
    use ka_core::EngineState;

    fn fast_config() -> PulseConfig {
        PulseConfig {
            minute: Duration::from_millis(40),
            pulse_timeout: Duration::from_secs(2),
            poll: Duration::from_millis(1),
        }
    }

    fn engine(backend: &SimulatedBackend) -> Arc<AudioOutputEngine> {
        Arc::new(AudioOutputEngine::new(Box::new(backend.clone())))
    }

    fn five() -> IntervalMinutes {
        IntervalMinutes::new(5).unwrap()
    }

    fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        done()
    }

    #[test]
    fn starts_idle() {
        let backend = SimulatedBackend::manual();
        let engine = engine(&backend);
        let scheduler = PulseScheduler::new(Arc::downgrade(&engine));
        assert_eq!(scheduler.state(), SchedulingState::Idle);
        assert_eq!(scheduler.interval(), None);
        assert_eq!(scheduler.config().minute, Duration::from_secs(60));
    }

    #[test]
    fn arm_and_stop() {
        let backend = SimulatedBackend::manual();
        let engine = engine(&backend);
        let mut scheduler = PulseScheduler::with_config(Arc::downgrade(&engine), fast_config());

        scheduler.start_with_interval_minutes(five());
        assert_eq!(scheduler.state(), SchedulingState::Scheduling);
        assert_eq!(scheduler.interval(), Some(five()));

        scheduler.stop();
        assert_eq!(scheduler.state(), SchedulingState::Idle);
        scheduler.stop();
        assert_eq!(scheduler.state(), SchedulingState::Idle);
    }

    #[test]
    fn rearm_replaces_interval() {
        let backend = SimulatedBackend::manual();
        let engine = engine(&backend);
        let mut scheduler = PulseScheduler::with_config(Arc::downgrade(&engine), fast_config());

        scheduler.start_with_interval_minutes(five());
        let ten = IntervalMinutes::new(10).unwrap();
        scheduler.start_with_interval_minutes(ten);

        assert_eq!(scheduler.state(), SchedulingState::Scheduling);
        assert_eq!(scheduler.interval(), Some(ten));
    }

    #[test]
    fn overrunning_pulses_coalesce_missed_firings() {
        // Manual device never completes, so every pulse runs until the
        // timeout, far past the 10ms period.
        let backend = SimulatedBackend::manual();
        let engine = engine(&backend);
        let config = PulseConfig {
            minute: Duration::from_millis(2),
            pulse_timeout: Duration::from_millis(120),
            poll: Duration::from_millis(1),
        };
        let mut scheduler = PulseScheduler::with_config(Arc::downgrade(&engine), config);

        scheduler.start_with_interval_minutes(five());
        assert!(wait_until(Duration::from_secs(5), || scheduler.stats().pulses >= 2));
        scheduler.stop();

        let stats = scheduler.stats();
        assert_eq!(stats.firings, stats.pulses);
        assert!(stats.skipped > 0, "{:?}", stats);
        assert_eq!(stats.failed, 0);

        let sessions = engine.stats();
        assert_eq!(sessions.sessions_started, sessions.sessions_stopped);
        assert_eq!(engine.state(), EngineState::Stopped);
        assert_eq!(engine.live_buffers(), 0);
    }

    #[test]
    fn pulse_starts_then_stops_engine() {
        let backend = SimulatedBackend::clocked(Duration::from_millis(2));
        let engine = engine(&backend);
        let scheduler = PulseScheduler::with_config(Arc::downgrade(&engine), fast_config());

        let outcome = scheduler.trigger_now();

        assert_eq!(outcome, PulseOutcome::Pulsed { completed: true });
        assert_eq!(engine.state(), EngineState::Stopped);
        assert_eq!(engine.stats().sessions_started, 1);
        assert_eq!(engine.stats().sessions_stopped, 1);
        assert!(engine.buffers_completed() >= 1);
        assert_eq!(engine.live_buffers(), 0);
    }

    #[test]
    fn pulse_times_out_without_completion() {
        let backend = SimulatedBackend::manual();
        let engine = engine(&backend);
        let config = PulseConfig {
            pulse_timeout: Duration::from_millis(20),
            ..fast_config()
        };
        let scheduler = PulseScheduler::with_config(Arc::downgrade(&engine), config);

        assert_eq!(scheduler.trigger_now(), PulseOutcome::Pulsed { completed: false });
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[test]
    fn firing_while_playing_leaves_engine_alone() {
        let backend = SimulatedBackend::manual();
        let engine = engine(&backend);
        let scheduler = PulseScheduler::with_config(Arc::downgrade(&engine), fast_config());

        engine.start().unwrap();
        assert_eq!(scheduler.trigger_now(), PulseOutcome::EngineBusy);
        assert_eq!(engine.state(), EngineState::Playing);
    }

    #[test]
    fn firing_after_engine_dropped_is_noop() {
        let backend = SimulatedBackend::manual();
        let engine = engine(&backend);
        let scheduler = PulseScheduler::with_config(Arc::downgrade(&engine), fast_config());
        drop(engine);

        assert_eq!(scheduler.trigger_now(), PulseOutcome::EngineGone);
        assert_eq!(backend.opened_devices(), 0);
    }

    #[test]
    fn scheduler_does_not_keep_engine_alive() {
        let backend = SimulatedBackend::manual();
        let engine = engine(&backend);
        let weak = Arc::downgrade(&engine);
        let mut scheduler = PulseScheduler::with_config(weak.clone(), fast_config());
        scheduler.start_with_interval_minutes(five());

        drop(engine);
        assert!(weak.upgrade().is_none());
        scheduler.stop();
    }

    #[test]
    fn failed_start_is_counted_and_recoverable() {
        let backend = SimulatedBackend::clocked(Duration::from_millis(2));
        backend.fail_open(true);
        let engine = engine(&backend);
        let scheduler = PulseScheduler::with_config(Arc::downgrade(&engine), fast_config());

        assert_eq!(scheduler.trigger_now(), PulseOutcome::StartFailed);
        assert_eq!(scheduler.stats().failed, 1);
        assert_eq!(engine.state(), EngineState::Stopped);

        backend.fail_open(false);
        assert_eq!(scheduler.trigger_now(), PulseOutcome::Pulsed { completed: true });
    }

    #[test]
    fn at_most_one_pulse_in_flight() {
        let backend = SimulatedBackend::manual();
        let engine = engine(&backend);
        let scheduler = PulseScheduler::with_config(Arc::downgrade(&engine), fast_config());

        std::thread::scope(|s| {
            let first = s.spawn(|| scheduler.trigger_now());

            assert!(wait_until(Duration::from_secs(2), || engine.is_playing()));
            assert_eq!(scheduler.trigger_now(), PulseOutcome::Skipped);

            // Let the first pulse see its buffer finish.
            assert!(backend.complete_next());
            assert_eq!(first.join().unwrap(), PulseOutcome::Pulsed { completed: true });
        });

        assert_eq!(engine.stats().sessions_started, 1);
        assert_eq!(engine.state(), EngineState::Stopped);
        let stats = scheduler.stats();
        assert_eq!(stats.firings, 2);
        assert_eq!(stats.pulses, 1);
        assert_eq!(stats.skipped, 1);
    }

    #[test]
    fn timer_fires_after_one_period() {
        let backend = SimulatedBackend::clocked(Duration::from_millis(2));
        let engine = engine(&backend);
        // 5 "minutes" of 60 ms: first firing at 300 ms, second at 600 ms.
        let config = PulseConfig {
            minute: Duration::from_millis(60),
            ..fast_config()
        };
        let mut scheduler = PulseScheduler::with_config(Arc::downgrade(&engine), config);

        scheduler.start_with_interval_minutes(five());
        assert_eq!(engine.state(), EngineState::Stopped);

        assert!(wait_until(Duration::from_secs(5), || scheduler.stats().pulses >= 1));
        assert_eq!(scheduler.state(), SchedulingState::Scheduling);
        assert_eq!(engine.state(), EngineState::Stopped);
        assert_eq!(engine.stats().sessions_started, 1);
        assert_eq!(engine.stats().sessions_stopped, 1);

        scheduler.stop();
    }

    #[test]
    fn stop_interrupts_pulse_and_stops_engine() {
        let backend = SimulatedBackend::manual();
        let engine = engine(&backend);
        let config = PulseConfig {
            minute: Duration::from_millis(2),
            pulse_timeout: Duration::from_secs(30),
            poll: Duration::from_millis(1),
        };
        let mut scheduler = PulseScheduler::with_config(Arc::downgrade(&engine), config);

        scheduler.start_with_interval_minutes(five());
        assert!(wait_until(Duration::from_secs(2), || engine.is_playing()));

        let started = Instant::now();
        scheduler.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(engine.state(), EngineState::Stopped);
        assert_eq!(engine.live_buffers(), 0);
    }
}
