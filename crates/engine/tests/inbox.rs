//! Inbox sweep tests: threading inbound mail onto open requests,
//! minting new ones, and ignoring redeliveries.

mod support;

use chrono::Utc;
use stina_domain::request::RequestStatus;
use stina_providers::RawInboundMessage;
use support::*;

#[tokio::test]
async fn sweep_mints_one_request_per_sender() {
    let h = harness();
    h.messaging
        .push_inbound(inbound_email("msg-1", "anna@example.com"));
    h.messaging
        .push_inbound(inbound_email("msg-2", "carl@example.com"));

    let touched = h.scheduler.sweep_inbox().await.unwrap();
    assert_eq!(touched.len(), 2);
    assert_ne!(touched[0].id, touched[1].id);
    for request in &touched {
        assert_eq!(request.status, RequestStatus::AnalysingEmail);
        assert_eq!(request.communications.len(), 1);
    }
}

#[tokio::test]
async fn followup_from_same_sender_threads_onto_open_request() {
    let h = harness();
    h.messaging
        .push_inbound(inbound_email("msg-1", "anna@example.com"));
    h.messaging.push_inbound(RawInboundMessage {
        message_id: "msg-2".into(),
        sender: "anna@example.com".into(),
        subject: None,
        body: "Actually, Wednesday works better for me.".into(),
        received_at: Utc::now(),
        thread_id: None,
    });

    let touched = h.scheduler.sweep_inbox().await.unwrap();
    assert_eq!(touched.len(), 2);
    assert_eq!(touched[0].id, touched[1].id);
    assert_eq!(touched[1].communications.len(), 2);
    assert_eq!(touched[1].unprocessed_ids(), vec!["msg-1", "msg-2"]);
}

#[tokio::test]
async fn redelivered_message_is_ignored() {
    let h = harness();
    h.messaging
        .push_inbound(inbound_email("msg-1", "anna@example.com"));
    h.scheduler.sweep_inbox().await.unwrap();

    // The provider hands over the same message again.
    h.messaging
        .push_inbound(inbound_email("msg-1", "anna@example.com"));
    let touched = h.scheduler.sweep_inbox().await.unwrap();

    assert_eq!(touched.len(), 1);
    assert_eq!(touched[0].communications.len(), 1);
}

#[tokio::test]
async fn unparseable_sender_is_skipped_not_fatal() {
    let h = harness();
    h.messaging.push_inbound(RawInboundMessage {
        message_id: "msg-0".into(),
        sender: "mailer-daemon".into(),
        subject: None,
        body: "delivery failure".into(),
        received_at: Utc::now(),
        thread_id: None,
    });
    h.messaging
        .push_inbound(inbound_email("msg-1", "anna@example.com"));

    let touched = h.scheduler.sweep_inbox().await.unwrap();
    assert_eq!(touched.len(), 1);
    assert_eq!(touched[0].creator.email, "anna@example.com");
}

#[tokio::test]
async fn sweep_does_not_thread_onto_closed_requests() {
    let h = harness();
    h.messaging
        .push_inbound(inbound_email("msg-1", "anna@example.com"));
    let first = h.scheduler.sweep_inbox().await.unwrap().remove(0);

    // Close the conversation, then a new mail from the same sender
    // must start a fresh request.
    h.scheduler
        .apply_transition(
            &first.id,
            RequestStatus::Cancelled,
            Default::default(),
        )
        .await
        .unwrap();

    h.messaging
        .push_inbound(inbound_email("msg-2", "anna@example.com"));
    let touched = h.scheduler.sweep_inbox().await.unwrap();
    assert_eq!(touched.len(), 1);
    assert_ne!(touched[0].id, first.id);
    assert_eq!(touched[0].status, RequestStatus::AnalysingEmail);
}
