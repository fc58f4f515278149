use std::time::Duration;

use super::support::*;
use crate::core::conversation::{Conversation, Phase};
use crate::core::history::Actor;

#[tokio::test]
async fn confirm_without_an_outstanding_plan_is_a_no_op() {
    let deps = scripted_deps(&[]);
    let conversation = Conversation::start(test_goal(), deps, 24);

    conversation.confirm().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(conversation.history().await.is_empty());
    assert_eq!(conversation.phase().await, Phase::AwaitingInput);
}

#[tokio::test]
async fn missing_argument_plan_asks_again_instead_of_awaiting_confirmation() {
    let deps = scripted_deps(&[
        VALIDATE_OK,
        PLAN_NOTE_MISSING,
        // The synthesized missing-arg follow-up bypasses validation and goes
        // straight back to the planner.
        r#"{"response": "What should the note say?", "next": "question", "tool": null, "args": {}}"#,
    ]);
    let conversation = Conversation::start(test_goal(), deps, 24);

    conversation.submit_prompt("record a note").await;
    wait_until(&conversation, |s| {
        s.history.len() == 2 && s.phase == Phase::AwaitingInput && s.queue.is_empty()
    })
    .await;

    // Confirming now must not execute anything: the plan was never
    // actionable and has been replaced by a question.
    conversation.confirm().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let history = conversation.history().await;
    assert!(history.iter().all(|m| m.actor != Actor::ToolResult));
    assert!(history.iter().all(|m| m.actor != Actor::UserConfirmedToolRun));
    assert_eq!(history[1].content, "What should the note say?");
}

#[tokio::test]
async fn confirmed_plan_executes_the_tool_and_continues() {
    let deps = scripted_deps(&[
        VALIDATE_OK,
        PLAN_NOTE_CONFIRM,
        // Planner reply for the tool-completion follow-up.
        r#"{"response": "Saved your note!", "next": "question", "tool": null, "args": {}}"#,
    ]);
    let conversation = Conversation::start(test_goal(), deps, 24);

    conversation.submit_prompt("note down hello").await;
    wait_until(&conversation, |s| s.phase == Phase::AwaitingConfirmation).await;

    conversation.confirm().await;
    wait_until(&conversation, |s| {
        s.phase == Phase::AwaitingInput && s.queue.is_empty() && s.history.len() == 5
    })
    .await;

    let history = conversation.history().await;
    assert_eq!(history[0].actor, Actor::User);
    assert_eq!(history[1].actor, Actor::Agent);
    assert_eq!(history[2].actor, Actor::UserConfirmedToolRun);
    assert_eq!(history[3].actor, Actor::ToolResult);
    let outcome = history[3].outcome.as_ref().unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.content["noted"], serde_json::json!("hello"));
    assert_eq!(history[4].content, "Saved your note!");
}

#[tokio::test]
async fn failing_tool_yields_one_failed_result_and_conversation_continues() {
    let deps = scripted_deps(&[
        VALIDATE_OK,
        PLAN_FAIL_CONFIRM,
        r#"{"response": "That tool is down, sorry.", "next": "question", "tool": null, "args": {}}"#,
        VALIDATE_OK,
        PLAN_QUESTION,
    ]);
    let conversation = Conversation::start(test_goal(), deps, 24);

    conversation.submit_prompt("try the flaky one").await;
    wait_until(&conversation, |s| s.phase == Phase::AwaitingConfirmation).await;
    conversation.confirm().await;
    wait_until(&conversation, |s| s.history.len() == 5 && s.queue.is_empty()).await;

    let history = conversation.history().await;
    let failures: Vec<_> = history
        .iter()
        .filter(|m| m.actor == Actor::ToolResult)
        .collect();
    assert_eq!(failures.len(), 1);
    let outcome = failures[0].outcome.as_ref().unwrap();
    assert!(!outcome.success);
    assert!(outcome.error.as_deref().unwrap().contains("synthetic failure"));

    // Still queryable and continuable.
    conversation.submit_prompt("ok something else").await;
    wait_until(&conversation, |s| s.history.len() == 7).await;
    assert_eq!(conversation.history().await[6].content, "What do you need?");
}

#[tokio::test]
async fn debug_confirm_skips_the_manual_approval() {
    let deps = scripted_deps(&[
        VALIDATE_OK,
        PLAN_NOTE_CONFIRM,
        r#"{"response": "Done without asking twice.", "next": "question", "tool": null, "args": {}}"#,
    ]);
    let conversation = Conversation::start(test_goal(), deps, 24);

    conversation.set_debug_confirm(true).await;
    conversation.submit_prompt("note down hello").await;

    wait_until(&conversation, |s| {
        s.history.iter().any(|m| m.actor == Actor::ToolResult)
    })
    .await;

    let history = conversation.history().await;
    assert!(history.iter().any(|m| m.actor == Actor::UserConfirmedToolRun));
}
