//! Inbound message ingestion.
//!
//! Normalizes raw inbox messages into [`Communication`]s and mints new
//! requests for messages that start a scheduling conversation.  The
//! provider's message id becomes the communication id, so re-delivering
//! the same message is detectable downstream.

use stina_domain::error::{Error, Result};
use stina_domain::request::{
    Communication, CommunicationChannel, Creator, MeetingRequest, Participant, RequestStatus,
};
use stina_providers::RawInboundMessage;

/// Normalize one raw inbound message.  The subject line, when present,
/// is folded into the content so the extraction stage sees it.
pub fn normalize(raw: &RawInboundMessage) -> Result<Communication> {
    if raw.sender.trim().is_empty() || !raw.sender.contains('@') {
        return Err(Error::validation(
            "sender",
            format!("'{}' is not an email address", raw.sender),
        ));
    }
    if raw.body.trim().is_empty() && raw.subject.as_deref().unwrap_or("").trim().is_empty() {
        return Err(Error::validation("body", "message has no content"));
    }

    let content = match raw.subject.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(subject) => format!("Subject: {subject}\n\n{}", raw.body),
        None => raw.body.clone(),
    };

    Ok(Communication {
        id: raw.message_id.clone(),
        channel: CommunicationChannel::Email,
        content,
        sender: raw.sender.to_lowercase(),
        timestamp: raw.received_at,
        processed: false,
    })
}

/// Mint a new request from an inbound email.  The request starts in
/// `analysing_email` with the sender as creator and sole participant,
/// and carries the normalized message as its first communication.
pub fn new_request_from(raw: &RawInboundMessage) -> Result<MeetingRequest> {
    let communication = normalize(raw)?;

    let mut request = MeetingRequest::new(
        Creator {
            email: communication.sender.clone(),
            channel: CommunicationChannel::Email,
        },
        RequestStatus::AnalysingEmail,
    );
    request.upsert_participant(Participant::new(communication.sender.clone()));
    request.communications.push(communication);
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn raw() -> RawInboundMessage {
        RawInboundMessage {
            message_id: "msg-1".into(),
            sender: "Anna@Example.com".into(),
            subject: Some("Coffee next week?".into()),
            body: "Do you have 30 minutes on Tuesday?".into(),
            received_at: Utc::now(),
            thread_id: None,
        }
    }

    #[test]
    fn normalize_folds_subject_and_lowercases_sender() {
        let comm = normalize(&raw()).unwrap();
        assert_eq!(comm.id, "msg-1");
        assert_eq!(comm.sender, "anna@example.com");
        assert!(comm.content.starts_with("Subject: Coffee next week?"));
        assert!(comm.content.contains("30 minutes on Tuesday"));
        assert!(!comm.processed);
    }

    #[test]
    fn normalize_rejects_non_email_sender() {
        let mut bad = raw();
        bad.sender = "mailer-daemon".into();
        let err = normalize(&bad).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn normalize_rejects_empty_message() {
        let mut bad = raw();
        bad.subject = None;
        bad.body = "   ".into();
        assert!(normalize(&bad).is_err());
    }

    #[test]
    fn new_request_starts_in_analysing_email() {
        let request = new_request_from(&raw()).unwrap();
        assert_eq!(request.status, RequestStatus::AnalysingEmail);
        assert_eq!(request.creator.email, "anna@example.com");
        assert_eq!(request.communications.len(), 1);
        assert_eq!(request.participants.len(), 1);
        assert!(request.oldest_unprocessed().is_some());
    }
}
