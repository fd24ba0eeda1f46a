//! Tests for export command

use std::fs;
use std::path::Path;

use httpmock::prelude::*;
use serde_json::{json, Value};
use tempfile::tempdir;

use tumblr_chat_export::commands::{export_run, ExportArgs};
use tumblr_chat_export::{
    Clock, Config, ConversationTarget, Credentials, Error, ScriptedPrompter, SessionLock,
};

const LOGIN_PAGE: &str = r#"<script>var state = {"API_TOKEN":"tok-int"};</script>"#;

// 2024-01-01 10:00:00 UTC
const JAN1: i64 = 1_704_103_200_000;
const DAY: i64 = 86_400_000;

fn config(server: &MockServer, dir: &Path) -> Config {
    Config {
        base_url: server.base_url(),
        lock_file: dir.join("export.lock"),
        ..Config::defaults()
    }
}

fn args(target: ConversationTarget) -> ExportArgs {
    ExportArgs {
        credentials: Credentials::new("me@example.com", "secret"),
        blog: "myblog".to_string(),
        target,
        cutoff: None,
        rate_limit: None,
        output: None,
        split: false,
        skip_ssl: false,
        offer_capture: false,
        clock: Clock::utc(),
    }
}

fn mock_login(server: &MockServer) {
    server.mock(|when, then| {
        when.method(GET).path("/login");
        then.status(200).body(LOGIN_PAGE);
    });
    server.mock(|when, then| {
        when.method(POST).path("/api/v2/login/mode");
        then.status(200);
    });
    server.mock(|when, then| {
        when.method(POST)
            .path("/api/v2/oauth2/token")
            .header("Authorization", "Bearer tok-int");
        then.status(200).json_body(json!({ "access_token": "ok" }));
    });
}

fn conversations_feed() -> Value {
    json!({ "response": { "conversations": [
        { "id": "c1", "participants": [
            { "uuid": "u-me", "name": "myblog" },
            { "uuid": "u-ann", "name": "ann" }
        ]},
        { "id": "c2", "participants": [
            { "uuid": "u-me", "name": "myblog" },
            { "uuid": "u-bob", "name": "bob" }
        ]}
    ]}})
}

fn mock_feeds(server: &MockServer) {
    server.mock(|when, then| {
        when.method(GET).path("/svc/conversations");
        then.status(200).json_body(conversations_feed());
    });
    server.mock(|when, then| {
        when.method(GET)
            .path("/svc/conversations/messages")
            .query_param("conversation_id", "c2");
        then.status(200).json_body(json!({ "response": { "messages": {
            "data": [
                { "type": "TEXT", "ts": JAN1 + DAY, "participant": "u-bob", "message": "next day" },
                { "type": "TEXT", "ts": JAN1 + 60_000, "participant": "u-me", "message": "reply" }
            ],
            "_links": { "next": { "href": "/svc/conversations/messages/page2" } }
        }}}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/svc/conversations/messages/page2");
        then.status(200).json_body(json!({ "response": { "messages": {
            "data": [
                { "type": "POSTREF", "ts": JAN1, "participant": "u-bob", "post": { "post_url": "" } }
            ]
        }}}));
    });
}

#[tokio::test]
async fn export_by_partner_splits_per_day() {
    let server = MockServer::start_async().await;
    mock_login(&server);
    mock_feeds(&server);

    let dir = tempdir().expect("tempdir");
    let config = config(&server, dir.path());
    let mut args = args(ConversationTarget::Counterpart("bob".into()));
    args.output = Some(dir.path().join("out.txt"));
    args.split = true;

    let mut prompter = ScriptedPrompter::default();
    let mut screen = Vec::new();
    let report = export_run(&config, &args, &mut prompter, &mut screen)
        .await
        .expect("export");

    assert_eq!(report.lines, 3);
    assert_eq!(
        fs::read_to_string(dir.path().join("out-20240101.txt")).unwrap(),
        "01/01/2024, 10:00:00 bob: sent a post that's no longer available.\n\
         01/01/2024, 10:01:00 myblog: reply\n"
    );
    assert_eq!(
        fs::read_to_string(dir.path().join("out-20240102.txt")).unwrap(),
        "02/01/2024, 10:00:00 bob: next day\n"
    );
    assert!(prompter.questions.is_empty());
    assert!(!config.lock_file.exists());
}

#[tokio::test]
async fn export_from_menu_prints_to_screen() {
    let server = MockServer::start_async().await;
    mock_login(&server);
    mock_feeds(&server);

    let dir = tempdir().expect("tempdir");
    let config = config(&server, dir.path());
    let mut args = args(ConversationTarget::Interactive);
    args.offer_capture = true;

    let mut prompter = ScriptedPrompter::new(["5", "2", "n"]);
    let mut screen = Vec::new();
    export_run(&config, &args, &mut prompter, &mut screen)
        .await
        .expect("export");

    assert_eq!(
        String::from_utf8(screen).unwrap(),
        "01/01/2024, 10:00:00 bob: sent a post that's no longer available.\n\
         01/01/2024, 10:01:00 myblog: reply\n\
         02/01/2024, 10:00:00 bob: next day\n\n"
    );
    assert_eq!(prompter.questions.len(), 3);
    assert!(prompter.questions[2].contains("save the conversation"));
}

#[tokio::test]
async fn rejected_login_releases_the_lock() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/login");
        then.status(200).body(LOGIN_PAGE);
    });
    server.mock(|when, then| {
        when.method(POST).path("/api/v2/login/mode");
        then.status(200);
    });
    server.mock(|when, then| {
        when.method(POST).path("/api/v2/oauth2/token");
        then.status(400).json_body(json!({
            "error": "invalid_grant",
            "error_description": "Wrong password"
        }));
    });
    let conversations = server.mock(|when, then| {
        when.method(GET).path("/svc/conversations");
        then.status(200).json_body(conversations_feed());
    });

    let dir = tempdir().expect("tempdir");
    let config = config(&server, dir.path());
    let mut prompter = ScriptedPrompter::default();
    let mut screen = Vec::new();

    let err = export_run(
        &config,
        &args(ConversationTarget::Id("c1".into())),
        &mut prompter,
        &mut screen,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::AuthRejected(ref d) if d == "Wrong password"));
    conversations.assert_calls(0);
    assert!(!config.lock_file.exists());
}

#[cfg(unix)]
#[tokio::test]
async fn held_lock_prevents_login() {
    let server = MockServer::start_async().await;
    let login = server.mock(|when, then| {
        when.method(GET).path("/login");
        then.status(200).body(LOGIN_PAGE);
    });

    let dir = tempdir().expect("tempdir");
    let config = config(&server, dir.path());
    let _held = SessionLock::acquire(&config.lock_file).expect("lock");

    let mut prompter = ScriptedPrompter::default();
    let mut screen = Vec::new();
    let err = export_run(
        &config,
        &args(ConversationTarget::Interactive),
        &mut prompter,
        &mut screen,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::SessionLocked));
    login.assert_calls(0);
}
