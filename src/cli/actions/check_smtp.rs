use crate::api::outbox::{RenderedMessage, SmtpConfig, SmtpEmailSender};
use anyhow::{Context, Result};
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub smtp: SmtpConfig,
    pub send_to: Option<String>,
}

fn test_message() -> RenderedMessage {
    RenderedMessage {
        subject: "Pinmate SMTP check".to_string(),
        body: format!(
            "This is a test message from {} {}.\n\nIf you received it, outgoing email is configured correctly.\n",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ),
    }
}

/// Connect to the relay, log in, and optionally send a test message.
/// # Errors
/// Returns an error if the relay is unreachable, rejects the login, or refuses the message.
pub async fn execute(args: Args) -> Result<()> {
    let sender = SmtpEmailSender::new(&args.smtp)?;

    sender
        .test_connection()
        .await
        .with_context(|| format!("SMTP check failed for {}:{}", args.smtp.host(), args.smtp.port()))?;
    info!(host = %args.smtp.host(), port = args.smtp.port(), "SMTP connection OK");
    println!("SMTP connection to {}:{} OK", args.smtp.host(), args.smtp.port());

    if let Some(to) = args.send_to.as_deref() {
        sender.send_rendered(to, &test_message()).await?;
        println!("Test message sent to {to}");
    }

    Ok(())
}
