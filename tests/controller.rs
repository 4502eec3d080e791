//! Interaction loop tests
//!
//! Drives the controller with scripted typed lines and scripted capture
//! sessions

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use chorus::{ExitReason, InteractionController, Origin};

mod common;

use common::{
    Heard, RecordingDisplay, RecordingResponder, ScriptedLines, ScriptedVoice, Shown, SilentLines,
};

struct Run {
    reason: ExitReason,
    responder: Arc<RecordingResponder>,
    voice: Arc<ScriptedVoice>,
    display: Arc<RecordingDisplay>,
}

async fn run(lines: &[&str], voice: ScriptedVoice) -> Run {
    let responder = Arc::new(RecordingResponder::default());
    let voice = Arc::new(voice);
    let display = Arc::new(RecordingDisplay::default());

    let controller = InteractionController::new(
        responder.clone(),
        Box::new(ScriptedLines::new(lines)),
        voice.clone(),
        display.clone(),
        CancellationToken::new(),
    );

    let reason = tokio::time::timeout(Duration::from_secs(5), controller.run())
        .await
        .expect("controller did not finish");

    Run {
        reason,
        responder,
        voice,
        display,
    }
}

#[tokio::test]
async fn test_typed_prompts_until_bye() {
    let run = run(&["hello", "   ", "Tell me a joke", "/bye", "never sent"], ScriptedVoice::default()).await;

    assert_eq!(run.reason, ExitReason::Bye);
    assert_eq!(run.responder.texts(), vec!["hello", "Tell me a joke"]);
    assert!(run.display.events().contains(&Shown::Notice("Goodbye!".to_string())));
}

#[tokio::test]
async fn test_end_of_input_exits() {
    let run = run(&["hello"], ScriptedVoice::default()).await;

    assert_eq!(run.reason, ExitReason::EndOfInput);
    assert_eq!(run.responder.texts(), vec!["hello"]);
}

#[tokio::test]
async fn test_voice_toggle_round_trip() {
    let voice = ScriptedVoice::new(&[
        Heard::Text("what time is it"),
        Heard::Text("please disable voice control"),
    ]);

    let run = run(&["activate voice control", "back to typing", "/bye"], voice).await;

    assert_eq!(run.reason, ExitReason::Bye);
    assert_eq!(run.responder.texts(), vec!["what time is it", "back to typing"]);

    let received = run.responder.received.lock().unwrap().clone();
    assert_eq!(received[0].origin, Origin::Spoken);
    assert_eq!(received[1].origin, Origin::Typed);

    assert_eq!(run.voice.opened.load(Ordering::SeqCst), 1);
    assert_eq!(run.voice.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_each_activation_opens_a_fresh_session() {
    let voice = ScriptedVoice::new(&[
        Heard::Text("disable voice control"),
        Heard::Text("disable voice control"),
    ]);

    let run = run(
        &["activate voice control", "activate voice control", "/bye"],
        voice,
    )
    .await;

    assert_eq!(run.reason, ExitReason::Bye);
    assert!(run.responder.texts().is_empty());
    assert_eq!(run.voice.opened.load(Ordering::SeqCst), 2);
    assert_eq!(run.voice.closed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_bye_exits_from_voice_mode() {
    let voice = ScriptedVoice::new(&[Heard::Text("/bye")]);

    let run = run(&["activate voice control", "never read"], voice).await;

    assert_eq!(run.reason, ExitReason::Bye);
    assert!(run.responder.texts().is_empty());
    assert_eq!(run.voice.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unavailable_voice_stays_typed() {
    let run = run(&["activate voice control", "hi", "/bye"], ScriptedVoice::unavailable()).await;

    assert_eq!(run.reason, ExitReason::Bye);
    assert_eq!(run.responder.texts(), vec!["hi"]);
    assert_eq!(run.display.errors(), 1);
}

#[tokio::test]
async fn test_capture_failure_falls_back_to_typed() {
    let voice = ScriptedVoice::new(&[Heard::Text("first question"), Heard::Failure]);

    let run = run(&["activate voice control", "typed again"], voice).await;

    assert_eq!(run.reason, ExitReason::EndOfInput);
    assert_eq!(run.responder.texts(), vec!["first question", "typed again"]);
    assert_eq!(run.voice.closed.load(Ordering::SeqCst), 1);
    assert_eq!(run.display.errors(), 1);
}

#[tokio::test]
async fn test_unreadable_line_is_reported_and_skipped() {
    let responder = Arc::new(RecordingResponder::default());
    let display = Arc::new(RecordingDisplay::default());
    let controller = InteractionController::new(
        responder.clone(),
        Box::new(ScriptedLines::with_unreadable(&[None, Some("hello"), Some("/bye")])),
        Arc::new(ScriptedVoice::default()),
        display.clone(),
        CancellationToken::new(),
    );

    let reason = tokio::time::timeout(Duration::from_secs(5), controller.run())
        .await
        .expect("controller did not finish");

    assert_eq!(reason, ExitReason::Bye);
    assert_eq!(responder.texts(), vec!["hello"]);
    assert_eq!(display.errors(), 1);
}

#[tokio::test]
async fn test_shutdown_while_waiting_for_typed_input() {
    let shutdown = CancellationToken::new();
    let controller = InteractionController::new(
        Arc::new(RecordingResponder::default()),
        Box::new(SilentLines),
        Arc::new(ScriptedVoice::default()),
        Arc::new(RecordingDisplay::default()),
        shutdown.clone(),
    );

    let handle = tokio::spawn(controller.run());
    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown.cancel();

    let reason = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reason, ExitReason::Interrupted);
}

#[tokio::test]
async fn test_shutdown_while_listening_closes_session() {
    let shutdown = CancellationToken::new();
    let voice = Arc::new(ScriptedVoice::default());
    let controller = InteractionController::new(
        Arc::new(RecordingResponder::default()),
        Box::new(ScriptedLines::new(&["activate voice control"])),
        voice.clone(),
        Arc::new(RecordingDisplay::default()),
        shutdown.clone(),
    );

    let handle = tokio::spawn(controller.run());
    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown.cancel();

    let reason = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reason, ExitReason::Interrupted);
    assert_eq!(voice.opened.load(Ordering::SeqCst), 1);
    assert_eq!(voice.closed.load(Ordering::SeqCst), 1);
}
