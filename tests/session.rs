use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use prompter::{EngineEvent, Error, Opts, ScrollTo, SessionHandle};

const SCRIPT: &str = "tell me about your day\nso anyway I went to the store\nand bought some milk";

/// Wait for the first event that isn't a confidence report.
fn next_command(events: &Receiver<EngineEvent>) -> Option<EngineEvent> {
    let give_up = Instant::now() + Duration::from_secs(5);
    loop {
        let left = give_up.saturating_duration_since(Instant::now());
        match events.recv_timeout(left) {
            Ok(EngineEvent::Confidence(_)) => continue,
            Ok(event) => return Some(event),
            Err(_) => return None,
        }
    }
}

#[test]
fn exact_line_scrolls_through_the_session_thread() -> anyhow::Result<()> {
    let (mut session, events) = SessionHandle::start(Opts::default(), SCRIPT)?;
    session.post_transcript("so anyway I went to the store")?;

    assert_eq!(
        next_command(&events),
        Some(EngineEvent::ScrollTo(ScrollTo { line_index: 1 }))
    );
    session.stop()?;
    Ok(())
}

#[test]
fn pending_match_commits_when_its_deadline_fires() -> anyhow::Result<()> {
    let (mut session, events) = SessionHandle::start(Opts::default(), SCRIPT)?;
    session.post_transcript("so anyway i")?;

    // Nothing else is posted: only the session's own timer can commit this.
    assert_eq!(
        next_command(&events),
        Some(EngineEvent::ScrollTo(ScrollTo { line_index: 1 }))
    );
    session.stop()?;
    Ok(())
}

#[test]
fn ticks_report_decaying_confidence() -> anyhow::Result<()> {
    let opts = Opts {
        tick_interval: 0.01,
        ..Opts::default()
    };
    let (mut session, events) = SessionHandle::start(opts, SCRIPT)?;

    let mut seen = Vec::new();
    while seen.len() < 3 {
        match events.recv_timeout(Duration::from_secs(5))? {
            EngineEvent::Confidence(level) => seen.push(level.value),
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert!(seen.windows(2).all(|w| w[1] <= w[0]), "{seen:?}");
    assert!(seen.iter().all(|v| *v < 1.0));
    session.stop()?;
    Ok(())
}

#[test]
fn script_reload_reanchors() -> anyhow::Result<()> {
    let (mut session, events) = SessionHandle::start(Opts::default(), SCRIPT)?;
    session.post_transcript("so anyway I went to the store")?;
    assert_eq!(
        next_command(&events),
        Some(EngineEvent::ScrollTo(ScrollTo { line_index: 1 }))
    );

    session.load_script("a new opening\nso anyway I went to the store\nand bought some milk")?;
    assert_eq!(
        next_command(&events),
        Some(EngineEvent::Reanchored(ScrollTo { line_index: 1 }))
    );
    session.stop()?;
    Ok(())
}

#[test]
fn invalid_options_are_refused() -> anyhow::Result<()> {
    let bad = Opts {
        instant_accept_score: 2.0,
        ..Opts::default()
    };
    assert!(matches!(
        SessionHandle::start(bad.clone(), SCRIPT),
        Err(Error::InvalidConfig { .. })
    ));

    let (mut session, _events) = SessionHandle::start(Opts::default(), SCRIPT)?;
    assert!(matches!(
        session.reconfigure(bad),
        Err(Error::InvalidConfig { .. })
    ));
    session.stop()?;
    Ok(())
}

#[test]
fn stopped_sessions_refuse_input_and_go_quiet() -> anyhow::Result<()> {
    let (mut session, events) = SessionHandle::start(Opts::default(), SCRIPT)?;
    session.stop()?;

    assert!(matches!(
        session.post_transcript("so anyway"),
        Err(Error::SessionClosed)
    ));
    // Stopping twice is harmless.
    session.stop()?;

    // Whatever was produced before stop is still buffered, then the channel is closed.
    while events.recv_timeout(Duration::from_secs(1)).is_ok() {}
    assert!(events.try_recv().is_err());
    Ok(())
}
