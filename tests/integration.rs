//! End-to-end tests for the memory engine
//!
//! The summarization channel is a stub shell script configured as the CLI
//! command, so the full observe/reflect/inject lifecycle runs without any
//! model access.

use engram::reflector::Aggressiveness;
use engram::{ChatMessage, EngramConfig, EngramError, MemoryEngine, Role};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Write an executable stub that drains stdin and prints `body`.
fn write_stub(dir: &Path, name: &str, body: &str) -> String {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    let script = format!("#!/bin/sh\ncat >/dev/null\n{}\n", body);
    std::fs::write(&path, script).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path.to_string_lossy().into_owned()
}

/// Stub that answers with a well-formed observation block.
fn observing_stub(dir: &Path) -> String {
    write_stub(
        dir,
        "observe-stub.sh",
        r#"cat <<'EOF'
<observations>
★ user prefers sqlite over postgres
◆ parser bug was in src/parser.rs line 40
session uses cargo workspaces
</observations>
<current_task>wire up the storage layer</current_task>
EOF"#,
    )
}

fn config_with_stub(stub: String) -> EngramConfig {
    let mut config = EngramConfig::default();
    config.observer_cli_command = vec![stub];
    // Keep the hosted channel out of the way
    config.api_key_env = "ENGRAM_TEST_NO_SUCH_KEY".to_string();
    config
}

async fn engine_with_stub(state: &TempDir, stub: String) -> MemoryEngine {
    MemoryEngine::new(config_with_stub(stub), state.path().to_path_buf())
        .await
        .unwrap()
}

fn turn(role: Role, content: &str) -> ChatMessage {
    ChatMessage::new(role, content)
}

#[tokio::test]
async fn observe_commits_and_consumes_pending() {
    let state = TempDir::new().unwrap();
    let engine = engine_with_stub(&state, observing_stub(state.path())).await;

    engine
        .on_turn_completed("s1", &[turn(Role::User, "let's fix the parser")])
        .await;
    let before = engine.status("s1").await;
    assert_eq!(before.pending_segments, 1);
    assert_eq!(before.observation_runs, 0);

    engine.observe("s1", None).await.unwrap();

    let after = engine.status("s1").await;
    assert_eq!(after.pending_segments, 0);
    assert_eq!(after.observation_runs, 1);
    assert_eq!(after.observation_lines, 3);
    assert!(after.last_observed_at.is_some());
    assert!(after.last_compression_ratio.is_some());
}

#[tokio::test]
async fn pending_threshold_auto_triggers_observation() {
    let state = TempDir::new().unwrap();
    let engine = engine_with_stub(&state, observing_stub(state.path())).await;

    // Well under the default 8000-token threshold: nothing happens
    engine
        .on_turn_completed("s1", &[turn(Role::User, "short turn")])
        .await;
    assert_eq!(engine.status("s1").await.observation_runs, 0);

    // A turn worth roughly 9000 tokens pushes the pending total over
    let big = "refactor the tokenizer module ".repeat(1_200);
    engine
        .on_turn_completed("s1", &[turn(Role::Assistant, &big)])
        .await;

    let status = engine.status("s1").await;
    assert_eq!(status.observation_runs, 1);
    assert_eq!(status.pending_segments, 0);
}

#[tokio::test]
async fn unparseable_model_output_leaves_pending_intact() {
    let state = TempDir::new().unwrap();
    let stub = write_stub(state.path(), "garbage.sh", "echo 'sure, here you go!'");
    let engine = engine_with_stub(&state, stub).await;

    engine
        .on_turn_completed("s1", &[turn(Role::User, "remember this")])
        .await;
    let result = engine.observe("s1", None).await;
    assert!(matches!(result, Err(EngramError::ParseFailure)));

    // Failed run consumed nothing and committed nothing
    let status = engine.status("s1").await;
    assert_eq!(status.pending_segments, 1);
    assert_eq!(status.observation_runs, 0);
    assert_eq!(status.observation_lines, 0);
    assert!(!status.is_observing);
}

#[tokio::test]
async fn observe_with_empty_buffer_is_nothing_to_do() {
    let state = TempDir::new().unwrap();
    let engine = engine_with_stub(&state, observing_stub(state.path())).await;
    let result = engine.observe("s1", None).await;
    assert!(matches!(result, Err(EngramError::NothingToDo(_))));
}

#[tokio::test]
async fn concurrent_observes_are_single_flight() {
    let state = TempDir::new().unwrap();
    let stub = write_stub(
        state.path(),
        "slow.sh",
        r#"sleep 1
cat <<'EOF'
<observations>
one line
</observations>
EOF"#,
    );
    let engine = engine_with_stub(&state, stub).await;
    engine
        .on_turn_completed("s1", &[turn(Role::User, "turn")])
        .await;

    let (a, b) = tokio::join!(engine.observe("s1", None), engine.observe("s1", None));
    let already_running =
        |r: &engram::Result<()>| matches!(r, Err(EngramError::AlreadyRunning(_)));
    assert!(a.is_ok() ^ b.is_ok());
    assert!(already_running(&a) || already_running(&b));
    assert_eq!(engine.status("s1").await.observation_runs, 1);
}

#[tokio::test]
async fn session_reload_during_run_keeps_the_runs_commit() {
    let state = TempDir::new().unwrap();
    let stub = write_stub(
        state.path(),
        "slow-observe.sh",
        r#"sleep 1
cat <<'EOF'
<observations>
committed during reload
</observations>
EOF"#,
    );
    let engine = engine_with_stub(&state, stub).await;
    engine
        .on_turn_completed("s1", &[turn(Role::User, "turn")])
        .await;

    // The reload lands while the observer run is still in flight and must
    // not swap out the handle the run will commit into
    let (observed, _) = tokio::join!(engine.observe("s1", None), async {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        engine.on_session_load("s1").await;
    });
    observed.unwrap();

    let status = engine.status("s1").await;
    assert_eq!(status.observation_runs, 1);
    assert_eq!(status.observation_lines, 1);
}

#[tokio::test]
async fn memory_survives_engine_restart() {
    let state = TempDir::new().unwrap();
    let stub = observing_stub(state.path());
    {
        let engine = engine_with_stub(&state, stub.clone()).await;
        engine
            .on_turn_completed("s1", &[turn(Role::User, "decide on sqlite")])
            .await;
        engine.observe("s1", None).await.unwrap();
    }

    let engine = engine_with_stub(&state, stub).await;
    let status = engine.status("s1").await;
    assert_eq!(status.observation_lines, 3);
    assert_eq!(status.observation_runs, 1);

    let payload = engine.render_memory("s1").await.unwrap();
    assert!(payload.contains("sqlite over postgres"));
    assert!(payload.contains("<current-task>"));
}

#[tokio::test]
async fn reflect_replaces_the_log() {
    let state = TempDir::new().unwrap();
    {
        let engine = engine_with_stub(&state, observing_stub(state.path())).await;
        engine
            .on_turn_completed("s1", &[turn(Role::User, "work work")])
            .await;
        engine.observe("s1", None).await.unwrap();
    }

    let reflect_stub = write_stub(
        state.path(),
        "reflect-stub.sh",
        r#"cat <<'EOF'
<observations>
★ user prefers sqlite; parser fixed in src/parser.rs
</observations>
EOF"#,
    );
    let engine = engine_with_stub(&state, reflect_stub).await;
    engine
        .reflect("s1", Aggressiveness::Aggressive, None)
        .await
        .unwrap();

    let status = engine.status("s1").await;
    assert_eq!(status.observation_lines, 1);
    assert_eq!(status.reflection_runs, 1);
    let payload = engine.render_memory("s1").await.unwrap();
    assert!(payload.contains("★ user prefers sqlite"));
    assert!(!payload.contains("cargo workspaces"));
}

#[tokio::test]
async fn failed_reflection_leaves_the_log_untouched() {
    let state = TempDir::new().unwrap();
    {
        let engine = engine_with_stub(&state, observing_stub(state.path())).await;
        engine
            .on_turn_completed("s1", &[turn(Role::User, "seed")])
            .await;
        engine.observe("s1", None).await.unwrap();
    }

    let garbage = write_stub(state.path(), "bad-reflect.sh", "echo 'no sections here'");
    let engine = engine_with_stub(&state, garbage).await;
    let result = engine.reflect("s1", Aggressiveness::Moderate, None).await;
    assert!(matches!(result, Err(EngramError::ParseFailure)));

    let status = engine.status("s1").await;
    assert_eq!(status.observation_lines, 3);
    assert_eq!(status.reflection_runs, 0);
    assert!(!status.is_reflecting);
}

#[tokio::test]
async fn reflect_with_no_observations_is_nothing_to_do() {
    let state = TempDir::new().unwrap();
    let engine = engine_with_stub(&state, observing_stub(state.path())).await;
    let result = engine.reflect("s1", Aggressiveness::Moderate, None).await;
    assert!(matches!(result, Err(EngramError::NothingToDo(_))));
}

#[tokio::test]
async fn prompt_build_injects_payload_and_continuation_notice() {
    let state = TempDir::new().unwrap();
    let engine = engine_with_stub(&state, observing_stub(state.path())).await;
    engine
        .on_turn_completed("s1", &[turn(Role::User, "hi")])
        .await;
    engine.observe("s1", None).await.unwrap();

    // Tail starts with an assistant message: continuation notice expected
    let messages = vec![
        turn(Role::Assistant, "picking up where we left off"),
        turn(Role::User, "continue"),
    ];
    let built = engine.on_prompt_build("s1", &messages).await;
    assert_eq!(built.len(), 4);
    assert_eq!(built[0].role, Role::System);
    assert!(built[0].content.contains("<session-memory>"));
    assert_eq!(built[1].role, Role::System);
    assert_eq!(built[2].content, "picking up where we left off");

    // Tail starting with a user message gets no notice
    let built = engine
        .on_prompt_build("s1", &[turn(Role::User, "hello again")])
        .await;
    assert_eq!(built.len(), 2);
    assert!(built[0].content.contains("<session-memory>"));
}

#[tokio::test]
async fn prompt_build_without_memory_passes_messages_through() {
    let state = TempDir::new().unwrap();
    let engine = engine_with_stub(&state, observing_stub(state.path())).await;
    let messages = vec![turn(Role::User, "first message ever")];
    let built = engine.on_prompt_build("empty-scope", &messages).await;
    assert_eq!(built.len(), 1);
    assert_eq!(built[0].content, "first message ever");
}

#[tokio::test]
async fn pre_compaction_folds_dropped_messages_into_memory() {
    let state = TempDir::new().unwrap();
    let engine = engine_with_stub(&state, observing_stub(state.path())).await;

    let dropped = vec![
        turn(Role::User, "old discussion about the schema"),
        turn(Role::Assistant, "agreed, sqlite it is"),
    ];
    let directive = engine
        .on_pre_compaction("s1", &dropped, Some("e-99".to_string()), None)
        .await;

    assert_eq!(directive.keep_from_id.as_deref(), Some("e-99"));
    let summary = directive.summary.unwrap();
    assert!(summary.contains("<session-memory>"));

    let status = engine.status("s1").await;
    assert_eq!(status.pending_segments, 0);
    assert!(status.observation_runs >= 1);
}

#[tokio::test]
async fn reset_wipes_memory_and_store() {
    let state = TempDir::new().unwrap();
    let stub = observing_stub(state.path());
    let engine = engine_with_stub(&state, stub.clone()).await;
    engine
        .on_turn_completed("s1", &[turn(Role::User, "note this down")])
        .await;
    engine.observe("s1", None).await.unwrap();
    assert!(engine.render_memory("s1").await.is_some());

    engine.reset("s1").await;
    assert!(engine.render_memory("s1").await.is_none());

    // A fresh engine over the same state dir sees nothing either
    let engine = engine_with_stub(&state, stub).await;
    assert_eq!(engine.status("s1").await.observation_lines, 0);
}

#[tokio::test]
async fn fork_copies_memory_into_new_scope() {
    let state = TempDir::new().unwrap();
    let engine = engine_with_stub(&state, observing_stub(state.path())).await;
    engine
        .on_turn_completed("s1", &[turn(Role::User, "remember the plan")])
        .await;
    engine.observe("s1", None).await.unwrap();

    engine.fork_scope("s1", "s1-fork").await;
    let forked = engine.render_memory("s1-fork").await.unwrap();
    assert!(forked.contains("sqlite over postgres"));

    // The fork is independent of the original
    engine.reset("s1").await;
    assert!(engine.render_memory("s1-fork").await.is_some());
}

#[tokio::test]
async fn no_channel_available_keeps_segments_pending() {
    let state = TempDir::new().unwrap();
    let mut config = EngramConfig::default();
    config.observer_cli_command = vec![state
        .path()
        .join("no-such-tool")
        .to_string_lossy()
        .into_owned()];
    config.api_key_env = "ENGRAM_TEST_NO_SUCH_KEY".to_string();
    let engine = MemoryEngine::new(config, state.path().to_path_buf())
        .await
        .unwrap();

    engine
        .on_turn_completed("s1", &[turn(Role::User, "important fact")])
        .await;
    let result = engine.observe("s1", None).await;
    assert!(matches!(result, Err(EngramError::SummarizerUnavailable)));
    assert_eq!(engine.status("s1").await.pending_segments, 1);
}

#[tokio::test]
async fn reload_config_picks_up_changes() {
    let state = TempDir::new().unwrap();
    let config_path: PathBuf = state.path().join("memory.json");
    tokio::fs::write(&config_path, r#"{"maxObservationItems": 7}"#)
        .await
        .unwrap();

    let engine = MemoryEngine::new(EngramConfig::default(), state.path().to_path_buf())
        .await
        .unwrap()
        .with_config_path(config_path.clone());
    assert_eq!(engine.config().await.max_observation_items, 200);

    engine.reload_config().await;
    assert_eq!(engine.config().await.max_observation_items, 7);

    // A second reload after the file changes again
    tokio::fs::write(&config_path, r#"{"maxObservationItems": 9}"#)
        .await
        .unwrap();
    engine.reload_config().await;
    assert_eq!(engine.config().await.max_observation_items, 9);
}
