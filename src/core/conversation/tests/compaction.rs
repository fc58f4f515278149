use super::support::*;
use crate::core::conversation::Conversation;
use crate::core::history::Actor;

const SUMMARY_REPLY: &str =
    "The user asked two support questions. Both were answered and nothing is pending.";

#[tokio::test]
async fn crossing_the_threshold_compacts_into_one_summary_message() {
    let deps = scripted_deps(&[
        VALIDATE_OK,
        r#"{"response": "answer one", "next": "question", "tool": null, "args": {}}"#,
        VALIDATE_OK,
        r#"{"response": "answer two", "next": "question", "tool": null, "args": {}}"#,
        SUMMARY_REPLY,
    ]);
    let conversation = Conversation::start(test_goal(), deps, 4);

    conversation.submit_prompt("question one").await;
    conversation.submit_prompt("question two").await;
    wait_until(&conversation, |s| s.generation == 1).await;

    let history = conversation.history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].actor, Actor::ConversationSummary);
    assert_eq!(history[0].content, SUMMARY_REPLY);
    assert_eq!(conversation.summary().await.as_deref(), Some(SUMMARY_REPLY));
}

#[tokio::test]
async fn still_queued_prompts_survive_compaction() {
    let deps = scripted_deps(&[
        VALIDATE_OK,
        r#"{"response": "answer one", "next": "question", "tool": null, "args": {}}"#,
        VALIDATE_OK,
        r#"{"response": "answer two", "next": "question", "tool": null, "args": {}}"#,
        SUMMARY_REPLY,
        VALIDATE_OK,
        r#"{"response": "answer three", "next": "question", "tool": null, "args": {}}"#,
    ]);
    let conversation = Conversation::start(test_goal(), deps, 4);

    conversation.submit_prompt("question one").await;
    conversation.submit_prompt("question two").await;
    conversation.submit_prompt("question three").await;

    wait_until(&conversation, |s| {
        s.generation == 1 && s.history.len() == 3 && s.queue.is_empty()
    })
    .await;

    let history = conversation.history().await;
    assert_eq!(history[0].actor, Actor::ConversationSummary);
    assert_eq!(history[1].content, "question three");
    assert_eq!(history[2].content, "answer three");
}

#[tokio::test]
async fn summary_backend_failure_falls_back_and_still_compacts() {
    // No scripted reply for the summary call: the gateway errors and the
    // compactor degrades to a mechanical summary.
    let deps = scripted_deps(&[
        VALIDATE_OK,
        r#"{"response": "answer one", "next": "question", "tool": null, "args": {}}"#,
        VALIDATE_OK,
        r#"{"response": "answer two", "next": "question", "tool": null, "args": {}}"#,
    ]);
    let conversation = Conversation::start(test_goal(), deps, 4);

    conversation.submit_prompt("question one").await;
    conversation.submit_prompt("question two").await;
    wait_until(&conversation, |s| s.generation == 1).await;

    let history = conversation.history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].actor, Actor::ConversationSummary);
    assert!(history[0].content.contains("question two"));
}
