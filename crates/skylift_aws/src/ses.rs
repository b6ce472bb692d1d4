//! SESv2 implementation of the mail transport seam.

use async_trait::async_trait;
use aws_sdk_sesv2::primitives::Blob;
use aws_sdk_sesv2::types::{Destination, EmailContent, RawMessage};
use skylift_core::email::{Envelope, MailTransport};
use skylift_core::BoxError;

/// [`MailTransport`] over SESv2 raw sending.
#[derive(Clone)]
pub struct SesMailer {
    client: aws_sdk_sesv2::Client,
}

impl SesMailer {
    pub fn new(client: aws_sdk_sesv2::Client) -> Self {
        Self { client }
    }

    /// Builds a mailer from the ambient AWS configuration.
    pub async fn from_env() -> Self {
        Self::new(crate::client::sesv2_client().await)
    }
}

#[async_trait]
impl MailTransport for SesMailer {
    async fn send_raw(&self, envelope: &Envelope, raw: &[u8]) -> Result<String, BoxError> {
        let raw_message = RawMessage::builder().data(Blob::new(raw)).build()?;
        let destination = Destination::builder()
            .set_to_addresses(non_empty(&envelope.to))
            .set_cc_addresses(non_empty(&envelope.cc))
            .build();

        let sent = self
            .client
            .send_email()
            .content(EmailContent::builder().raw(raw_message).build())
            .destination(destination)
            .from_email_address(envelope.from.clone())
            .set_reply_to_addresses(non_empty(&envelope.reply_to))
            .send()
            .await?;

        let message_id = sent
            .message_id()
            .ok_or_else(|| BoxError::from("message id missing in send response"))?;
        Ok(format_message_id(message_id))
    }
}

fn non_empty(addresses: &[String]) -> Option<Vec<String>> {
    (!addresses.is_empty()).then(|| addresses.to_vec())
}

/// SES returns a bare id; recipients see the full RFC 5322 form.
fn format_message_id(message_id: &str) -> String {
    format!("<{message_id}@email.amazonses.com>")
}
