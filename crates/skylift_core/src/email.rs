//! Transactional email composition with a size-based fallback.
//!
//! Builds a MIME message from an [`EmailSpec`] and sends it through the
//! [`MailTransport`] seam. When the provider rejects a message whose encoded
//! size is over the limit, the attachments are replaced with a single
//! generated summary and the send is retried exactly once.

use std::collections::HashSet;
use std::fmt::Write as _;

use async_trait::async_trait;
use mail_builder::headers::address::Address;
use mail_builder::headers::raw::Raw;
use mail_builder::MessageBuilder;

use crate::BoxError;

/// Provider ceiling for an encoded raw message.
pub const MAX_RAW_MESSAGE_BYTES: usize = 40 * 1024 * 1024;

/// A display name plus address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    pub name: Option<String>,
    pub address: String,
}

impl Mailbox {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            name: None,
            address: address.into(),
        }
    }

    pub fn named(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            address: address.into(),
        }
    }

    fn header_value(&self) -> String {
        match &self.name {
            Some(name) => format!("{name} <{}>", self.address),
            None => self.address.clone(),
        }
    }

    fn as_address(&self) -> Address<'_> {
        Address::new_address(self.name.as_deref(), self.address.as_str())
    }
}

/// A binary part. A `content_id` marks the part as inline; inline parts
/// must carry unique content identifiers within one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content: Vec<u8>,
    pub content_type: String,
    pub content_id: Option<String>,
}

/// Everything needed to compose one outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailSpec {
    pub subject: String,
    pub from: Mailbox,
    pub reply_to: Vec<Mailbox>,
    pub to: Vec<Mailbox>,
    pub cc: Vec<Mailbox>,
    pub html: String,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub attachments: Vec<Attachment>,
}

/// Sender and recipients as the provider wants them: the MIME payload
/// carries the headers, but destinations travel separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub from: String,
    pub reply_to: Vec<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
}

/// Errors produced while composing or sending.
#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("duplicate content id {0:?}")]
    DuplicateContentId(String),

    #[error("can't encode mime message: {0}")]
    Build(#[from] std::io::Error),

    #[error("send failed: {0}")]
    Transport(#[source] BoxError),
}

/// Raw-message sending seam.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Sends an encoded MIME message, returning the provider message id.
    async fn send_raw(&self, envelope: &Envelope, raw: &[u8]) -> Result<String, BoxError>;
}

/// Composes and sends `spec`, returning the provider message id.
///
/// A transport failure on a message whose encoded size exceeds
/// [`MAX_RAW_MESSAGE_BYTES`] triggers one retry with the attachments
/// replaced by a generated summary; the retry's result is surfaced as-is.
pub async fn send_email(
    transport: &impl MailTransport,
    spec: &EmailSpec,
) -> Result<String, EmailError> {
    send_with_limit(transport, spec, MAX_RAW_MESSAGE_BYTES).await
}

async fn send_with_limit(
    transport: &impl MailTransport,
    spec: &EmailSpec,
    max_raw_bytes: usize,
) -> Result<String, EmailError> {
    reject_duplicate_content_ids(&spec.attachments)?;
    let envelope = envelope_for(spec);
    let raw = encode_message(spec)?;

    match transport.send_raw(&envelope, &raw).await {
        Ok(message_id) => Ok(message_id),
        Err(error) if raw.len() > max_raw_bytes => {
            tracing::warn!(
                bytes = raw.len(),
                limit = max_raw_bytes,
                %error,
                "message over size limit, retrying without attachments"
            );
            let stripped = strip_attachments(spec);
            let raw = encode_message(&stripped)?;
            transport
                .send_raw(&envelope, &raw)
                .await
                .map_err(EmailError::Transport)
        }
        Err(error) => Err(EmailError::Transport(error)),
    }
}

fn reject_duplicate_content_ids(attachments: &[Attachment]) -> Result<(), EmailError> {
    let mut seen = HashSet::new();
    for attachment in attachments {
        if let Some(content_id) = &attachment.content_id {
            if !seen.insert(content_id.as_str()) {
                return Err(EmailError::DuplicateContentId(content_id.clone()));
            }
        }
    }
    Ok(())
}

fn envelope_for(spec: &EmailSpec) -> Envelope {
    Envelope {
        from: spec.from.header_value(),
        reply_to: spec.reply_to.iter().map(|m| m.address.clone()).collect(),
        to: spec.to.iter().map(|m| m.address.clone()).collect(),
        cc: spec.cc.iter().map(|m| m.address.clone()).collect(),
    }
}

fn encode_message(spec: &EmailSpec) -> Result<Vec<u8>, EmailError> {
    let mut builder = MessageBuilder::new()
        .subject(spec.subject.as_str())
        .from(spec.from.as_address())
        .to(Address::new_list(
            spec.to.iter().map(Mailbox::as_address).collect(),
        ))
        .html_body(spec.html.as_str());

    if !spec.cc.is_empty() {
        builder = builder.cc(Address::new_list(
            spec.cc.iter().map(Mailbox::as_address).collect(),
        ));
    }
    if !spec.reply_to.is_empty() {
        builder = builder.reply_to(Address::new_list(
            spec.reply_to.iter().map(Mailbox::as_address).collect(),
        ));
    }
    if let Some(in_reply_to) = &spec.in_reply_to {
        builder = builder.header("In-Reply-To", Raw::new(in_reply_to.as_str()));
    }
    if !spec.references.is_empty() {
        builder = builder.header("References", Raw::new(spec.references.join(" ")));
    }
    for attachment in &spec.attachments {
        builder = match &attachment.content_id {
            Some(content_id) => builder.inline(
                attachment.content_type.as_str(),
                content_id.as_str(),
                attachment.content.as_slice(),
            ),
            None => builder.attachment(
                attachment.content_type.as_str(),
                attachment.filename.as_str(),
                attachment.content.as_slice(),
            ),
        };
    }

    Ok(builder.write_to_vec()?)
}

/// Replaces the attachments with one plain-text part summarizing what was
/// dropped, keeping the rest of the message intact.
fn strip_attachments(spec: &EmailSpec) -> EmailSpec {
    let mut summary = String::from(
        "We encountered an error when first trying to send this email, due to its size, \
         so we have removed the attachments and are trying again.\n\n\
         Here were the original attachment(s):\n\n",
    );
    for (index, attachment) in spec.attachments.iter().enumerate() {
        let _ = writeln!(
            summary,
            "attachment #{}: filename {:?}, with content type {:?}, contained {} bytes.\n",
            index + 1,
            attachment.filename,
            attachment.content_type,
            attachment.content.len()
        );
    }

    let mut stripped = spec.clone();
    stripped.attachments = vec![Attachment {
        filename: "error.txt".to_string(),
        content: summary.into_bytes(),
        content_type: "text/plain".to_string(),
        content_id: None,
    }];
    stripped
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Scripted transport recording each envelope and raw payload.
    #[derive(Default)]
    struct FakeTransport {
        script: Mutex<VecDeque<Result<String, String>>>,
        calls: Mutex<Vec<(Envelope, Vec<u8>)>>,
    }

    impl FakeTransport {
        fn scripted(results: Vec<Result<String, String>>) -> Self {
            Self {
                script: Mutex::new(results.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().expect("poisoned mutex").len()
        }

        fn raw_of_call(&self, index: usize) -> Vec<u8> {
            self.calls.lock().expect("poisoned mutex")[index].1.clone()
        }
    }

    #[async_trait]
    impl MailTransport for FakeTransport {
        async fn send_raw(&self, envelope: &Envelope, raw: &[u8]) -> Result<String, BoxError> {
            self.calls
                .lock()
                .expect("poisoned mutex")
                .push((envelope.clone(), raw.to_vec()));
            match self.script.lock().expect("poisoned mutex").pop_front() {
                Some(Ok(message_id)) => Ok(message_id),
                Some(Err(message)) => Err(message.into()),
                None => Ok("unscripted-id".to_string()),
            }
        }
    }

    fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|window| window == needle)
    }

    fn sample_spec() -> EmailSpec {
        EmailSpec {
            subject: "monthly report".to_string(),
            from: Mailbox::named("Reports", "reports@example.com"),
            reply_to: vec![Mailbox::new("replies@example.com")],
            to: vec![Mailbox::new("to@example.com")],
            cc: vec![Mailbox::new("cc@example.com")],
            html: "<p>hi</p>".to_string(),
            in_reply_to: Some("<prev@example.com>".to_string()),
            references: vec!["<root@example.com>".to_string(), "<prev@example.com>".to_string()],
            attachments: vec![Attachment {
                filename: "report.bin".to_string(),
                content: vec![7u8; 4096],
                content_type: "application/octet-stream".to_string(),
                content_id: None,
            }],
        }
    }

    #[tokio::test]
    async fn sends_and_returns_provider_message_id() {
        let transport = FakeTransport::scripted(vec![Ok("id-1".to_string())]);

        let message_id = send_email(&transport, &sample_spec())
            .await
            .expect("send should succeed");

        assert_eq!(message_id, "id-1");
        assert_eq!(transport.call_count(), 1);
        let calls = transport.calls.lock().expect("poisoned mutex");
        let envelope = &calls[0].0;
        assert_eq!(envelope.from, "Reports <reports@example.com>");
        assert_eq!(envelope.to, vec!["to@example.com"]);
        assert_eq!(envelope.cc, vec!["cc@example.com"]);
        assert_eq!(envelope.reply_to, vec!["replies@example.com"]);
        assert!(contains_subslice(&calls[0].1, b"monthly report"));
        assert!(contains_subslice(&calls[0].1, b"In-Reply-To"));
    }

    #[tokio::test]
    async fn duplicate_content_ids_are_rejected_before_any_send() {
        let transport = FakeTransport::default();
        let mut spec = sample_spec();
        spec.attachments = vec![
            Attachment {
                filename: "a.txt".to_string(),
                content: b"hi".to_vec(),
                content_type: "text/plain".to_string(),
                content_id: Some("1".to_string()),
            },
            Attachment {
                filename: "b.txt".to_string(),
                content: b"bye".to_vec(),
                content_type: "text/plain".to_string(),
                content_id: Some("1".to_string()),
            },
        ];

        let error = send_email(&transport, &spec)
            .await
            .expect_err("duplicate content id should be rejected");

        assert!(matches!(error, EmailError::DuplicateContentId(id) if id == "1"));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn oversize_failure_retries_once_without_attachments() {
        let transport = FakeTransport::scripted(vec![
            Err("message too long".to_string()),
            Ok("id-2".to_string()),
        ]);

        // Tiny limit so the first attempt counts as oversized.
        let message_id = send_with_limit(&transport, &sample_spec(), 64)
            .await
            .expect("fallback send should succeed");

        assert_eq!(message_id, "id-2");
        assert_eq!(transport.call_count(), 2);
        let retry_raw = transport.raw_of_call(1);
        assert!(contains_subslice(&retry_raw, b"error.txt"));
        assert!(contains_subslice(&retry_raw, b"report.bin"));
        assert!(retry_raw.len() < transport.raw_of_call(0).len());
    }

    #[tokio::test]
    async fn second_failure_is_surfaced_without_further_retries() {
        let transport = FakeTransport::scripted(vec![
            Err("message too long".to_string()),
            Err("still rejected".to_string()),
        ]);

        let error = send_with_limit(&transport, &sample_spec(), 64)
            .await
            .expect_err("second failure should surface");

        assert!(matches!(error, EmailError::Transport(_)));
        assert!(error.to_string().contains("still rejected"));
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn failure_under_the_size_limit_is_surfaced_without_retry() {
        let transport = FakeTransport::scripted(vec![Err("mailbox unavailable".to_string())]);

        let error = send_email(&transport, &sample_spec())
            .await
            .expect_err("transport failure should surface");

        assert!(matches!(error, EmailError::Transport(_)));
        assert_eq!(transport.call_count(), 1);
    }

    #[test]
    fn inline_attachments_are_encoded_with_their_content_id() {
        let mut spec = sample_spec();
        spec.attachments = vec![Attachment {
            filename: "logo.png".to_string(),
            content: vec![1, 2, 3],
            content_type: "image/png".to_string(),
            content_id: Some("logo-cid".to_string()),
        }];

        let raw = encode_message(&spec).expect("message should encode");
        assert!(contains_subslice(&raw, b"logo-cid"));
    }
}
