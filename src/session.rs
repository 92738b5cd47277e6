//! Mailbox-driven session actor.
//!
//! A session owns one [`AlignmentEngine`] on a dedicated thread. Hosts post recognizer updates,
//! script edits and settings changes into a bounded command queue; the thread processes them in
//! receipt order, interleaved with its own timers:
//! - the periodic tick (confidence decay, confirmation expiry)
//! - the pending confirmation deadline, if any
//!
//! Everything the engine touches is confined to that thread, so it needs no locks. Timers are
//! realised with `recv_timeout` rather than sleeping, which keeps the thread responsive to new
//! transcript updates while a confirmation is pending.
//!
//! Stopping the session (explicitly or by dropping the handle) cancels any pending deadline and
//! joins the thread; no event is produced after `stop` returns.

use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{info, info_span, warn};
use uuid::Uuid;

use crate::confirm::Deadline;
use crate::engine::{AlignmentEngine, EngineEvent, Step};
use crate::opts::Opts;
use crate::{Error, Result};

/// Commands buffered before `post_*` calls start to block.
const COMMAND_QUEUE_DEPTH: usize = 256;

enum Command {
    Transcript { text: String, at: Instant },
    LoadScript { text: String, at: Instant },
    Reconfigure { opts: Opts, at: Instant },
    ResetUtterance,
    Stop,
}

/// Handle to a running session.
pub struct SessionHandle {
    id: Uuid,
    started_at: Instant,
    tx: mpsc::SyncSender<Command>,
    thread: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Validate `opts`, segment the script and start the session thread.
    ///
    /// Returns the handle and the receiver for the session's events. The host should keep
    /// draining the receiver; confidence is reported on every tick.
    pub fn start(
        opts: Opts,
        script_text: &str,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        let engine = AlignmentEngine::new(opts, script_text, Duration::ZERO)?;
        let started_at = Instant::now();
        let id = Uuid::new_v4();

        let (tx, rx) = mpsc::sync_channel::<Command>(COMMAND_QUEUE_DEPTH);
        let (events_tx, events_rx) = mpsc::channel::<EngineEvent>();

        let thread = std::thread::Builder::new()
            .name(format!("prompter-session-{id}"))
            .spawn(move || {
                let span = info_span!("session", session_id = %id);
                let _entered = span.enter();
                run(engine, rx, events_tx, started_at);
            })?;

        info!(session_id = %id, "session thread started");
        Ok((
            Self {
                id,
                started_at,
                tx,
                thread: Some(thread),
            },
            events_rx,
        ))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// When the session's clock started. Engine timestamps are measured from here.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Post a recognizer update stamped with the current time.
    pub fn post_transcript(&self, text: impl Into<String>) -> Result<()> {
        self.post_transcript_at(text, Instant::now())
    }

    /// Post a recognizer update carrying the recognizer's own timestamp.
    pub fn post_transcript_at(&self, text: impl Into<String>, at: Instant) -> Result<()> {
        self.send(Command::Transcript {
            text: text.into(),
            at,
        })
    }

    /// Replace the script; the session re-anchors the cursor.
    pub fn load_script(&self, text: impl Into<String>) -> Result<()> {
        self.send(Command::LoadScript {
            text: text.into(),
            at: Instant::now(),
        })
    }

    /// Apply new options. They are validated here so the caller sees configuration errors.
    pub fn reconfigure(&self, opts: Opts) -> Result<()> {
        opts.validate()?;
        self.send(Command::Reconfigure {
            opts,
            at: Instant::now(),
        })
    }

    /// The recognizer started a new utterance.
    pub fn reset_utterance(&self) -> Result<()> {
        self.send(Command::ResetUtterance)
    }

    /// End the session and wait for its thread to finish. Later posts fail with
    /// [`Error::SessionClosed`].
    pub fn stop(&mut self) -> Result<()> {
        self.shutdown()
    }

    fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).map_err(|_| Error::SessionClosed)
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };

        // The thread may already be gone; joining tells us whether it exited cleanly.
        let _ = self.tx.send(Command::Stop);
        thread
            .join()
            .map_err(|_| Error::msg("session thread panicked"))?;
        info!(session_id = %self.id, "session stopped");
        Ok(())
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(%err, session_id = %self.id, "session shutdown failed");
        }
    }
}

fn run(
    mut engine: AlignmentEngine,
    rx: mpsc::Receiver<Command>,
    events: mpsc::Sender<EngineEvent>,
    started_at: Instant,
) {
    let mut timers = Timers::realtime(engine.opts().tick_interval_duration(), Duration::ZERO);
    let since_start = |at: Instant| at.saturating_duration_since(started_at);

    loop {
        let now = started_at.elapsed();
        while let Some(timer) = timers.pop_due(now) {
            let step = timer.fire(&mut engine, now);
            timers.observe(&step);
            publish(&events, step);
        }

        let timeout = timers.next_wake().saturating_sub(now);
        let command = match rx.recv_timeout(timeout) {
            Ok(command) => command,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };

        let step = match command {
            Command::Transcript { text, at } => engine.on_transcript(&text, since_start(at)),
            Command::LoadScript { text, at } => {
                timers.cancel_deadline();
                engine.load_script(&text, since_start(at))
            }
            Command::Reconfigure { opts, at } => {
                let now = since_start(at);
                match engine.reconfigure(opts, now) {
                    Ok(step) => {
                        timers.cancel_deadline();
                        timers.set_tick_interval(engine.opts().tick_interval_duration(), now);
                        step
                    }
                    Err(err) => {
                        warn!(%err, "ignoring invalid reconfigure");
                        continue;
                    }
                }
            }
            Command::ResetUtterance => {
                engine.reset_utterance();
                continue;
            }
            Command::Stop => break,
        };

        timers.observe(&step);
        publish(&events, step);
    }

    // Dropping the engine releases the window and any pending match with it.
    info!("session loop exited");
}

fn publish(events: &mpsc::Sender<EngineEvent>, step: Step) {
    for event in step.events {
        // A host that dropped its receiver just stops hearing about events.
        let _ = events.send(event);
    }
}

/// A timer that came due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Timer {
    Deadline(Deadline),
    Tick(Duration),
}

impl Timer {
    pub(crate) fn at(&self) -> Duration {
        match self {
            Timer::Deadline(d) => d.at,
            Timer::Tick(at) => *at,
        }
    }

    pub(crate) fn fire(self, engine: &mut AlignmentEngine, now: Duration) -> Step {
        match self {
            Timer::Deadline(deadline) => engine.on_deadline(deadline, now),
            Timer::Tick(_) => engine.tick(now),
        }
    }
}

/// The tick schedule plus at most one outstanding confirmation deadline.
///
/// Shared by the session thread (wall clock) and the replay driver (simulated clock).
#[derive(Debug)]
pub(crate) struct Timers {
    tick_interval: Duration,
    next_tick: Duration,
    deadline: Option<Deadline>,

    // Wall-clock drivers skip ticks missed while busy instead of firing them in a burst.
    coalesce_ticks: bool,
}

impl Timers {
    pub(crate) fn realtime(tick_interval: Duration, origin: Duration) -> Self {
        Self::new(tick_interval, origin, true)
    }

    pub(crate) fn simulated(tick_interval: Duration, origin: Duration) -> Self {
        Self::new(tick_interval, origin, false)
    }

    fn new(tick_interval: Duration, origin: Duration, coalesce_ticks: bool) -> Self {
        Self {
            tick_interval,
            next_tick: origin + tick_interval,
            deadline: None,
            coalesce_ticks,
        }
    }

    /// Record the deadline a step asked for. A newer deadline replaces an older one; the engine
    /// treats the replaced one as stale anyway.
    pub(crate) fn observe(&mut self, step: &Step) {
        if let Some(deadline) = step.schedule {
            self.deadline = Some(deadline);
        }
    }

    pub(crate) fn next_wake(&self) -> Duration {
        self.deadline
            .map_or(self.next_tick, |d| d.at.min(self.next_tick))
    }

    /// Take the earliest timer due at or before `now`. Deadlines win ties with ticks.
    pub(crate) fn pop_due(&mut self, now: Duration) -> Option<Timer> {
        if let Some(deadline) = self.deadline {
            if deadline.at <= now && deadline.at <= self.next_tick {
                self.deadline = None;
                return Some(Timer::Deadline(deadline));
            }
        }

        if self.next_tick <= now {
            let at = self.next_tick;
            self.next_tick = if self.coalesce_ticks {
                (at + self.tick_interval).max(now + self.tick_interval)
            } else {
                at + self.tick_interval
            };
            return Some(Timer::Tick(at));
        }

        None
    }

    pub(crate) fn cancel_deadline(&mut self) {
        self.deadline = None;
    }

    pub(crate) fn set_tick_interval(&mut self, tick_interval: Duration, now: Duration) {
        self.tick_interval = tick_interval;
        self.next_tick = now + tick_interval;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn deadline_step(at: Duration, generation: u64) -> Step {
        Step {
            events: Vec::new(),
            schedule: Some(Deadline { at, generation }),
        }
    }

    #[test]
    fn simulated_ticks_fire_at_every_interval() {
        let mut timers = Timers::simulated(ms(50), Duration::ZERO);
        let mut fired = Vec::new();
        while let Some(timer) = timers.pop_due(ms(160)) {
            fired.push(timer);
        }
        assert_eq!(
            fired,
            vec![Timer::Tick(ms(50)), Timer::Tick(ms(100)), Timer::Tick(ms(150))]
        );
        assert_eq!(timers.next_wake(), ms(200));
    }

    #[test]
    fn realtime_ticks_coalesce_after_a_stall() {
        let mut timers = Timers::realtime(ms(50), Duration::ZERO);
        assert_eq!(timers.pop_due(ms(500)), Some(Timer::Tick(ms(50))));
        assert_eq!(timers.pop_due(ms(500)), None);
        assert_eq!(timers.next_wake(), ms(550));
    }

    #[test]
    fn deadlines_interleave_with_ticks_in_time_order() {
        let mut timers = Timers::simulated(ms(50), Duration::ZERO);
        timers.observe(&deadline_step(ms(80), 3));
        assert_eq!(timers.next_wake(), ms(50));

        let mut fired = Vec::new();
        while let Some(timer) = timers.pop_due(ms(100)) {
            fired.push(timer.at());
        }
        assert_eq!(fired, vec![ms(50), ms(80), ms(100)]);
    }

    #[test]
    fn deadline_wins_a_tie_with_a_tick() {
        let mut timers = Timers::simulated(ms(50), Duration::ZERO);
        timers.observe(&deadline_step(ms(50), 1));
        assert_eq!(
            timers.pop_due(ms(50)),
            Some(Timer::Deadline(Deadline {
                at: ms(50),
                generation: 1
            }))
        );
        assert_eq!(timers.pop_due(ms(50)), Some(Timer::Tick(ms(50))));
    }

    #[test]
    fn cancelled_deadlines_never_fire() {
        let mut timers = Timers::simulated(ms(50), Duration::ZERO);
        timers.observe(&deadline_step(ms(10), 0));
        timers.cancel_deadline();
        assert_eq!(timers.pop_due(ms(20)), None);
    }
}
