use crate::{
    api::{
        self, ServerConfig,
        handlers::auth::{JwtTokenIssuer, provider::{HostedProviderConfig, SendmatorClient}},
    },
    cli::{commands::tokens, telemetry},
};
use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub config: ServerConfig,
    pub tokens: tokens::Options,
    pub provider: HostedProviderConfig,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the hosted provider client cannot be built or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let Args {
        config,
        tokens,
        provider,
    } = args;

    debug!("Server config: {:?}", config);

    let issuer = JwtTokenIssuer::new(&tokens.secret, tokens.issuer)
        .with_access_ttl_seconds(tokens.access_ttl_seconds)
        .with_refresh_ttl_seconds(tokens.refresh_ttl_seconds);

    let hosted = SendmatorClient::new(provider)?;

    let result = api::new(config, Arc::new(issuer), Arc::new(hosted)).await;

    telemetry::shutdown_tracer();

    result
}
