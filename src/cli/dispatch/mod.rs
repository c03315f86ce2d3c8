//! Map validated CLI arguments to an action.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{
    ARG_DSN, ARG_PORT, ARG_SESSION_COOKIE_NAME, ARG_SESSION_COOKIE_SECURE,
    ARG_SESSION_TTL_SECONDS, ARG_TOKEN_ISSUER, ARG_TOKEN_SECRET, ARG_TOKEN_TTL_SECONDS,
};
use anyhow::{anyhow, Context, Result};
use secrecy::SecretString;

/// Shortest accepted HMAC secret, in bytes.
pub const MIN_TOKEN_SECRET_LEN: usize = 32;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or the token secret is too short.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;

    let token_secret = matches
        .get_one::<String>(ARG_TOKEN_SECRET)
        .cloned()
        .context("missing required argument: --token-secret")?;
    if token_secret.len() < MIN_TOKEN_SECRET_LEN {
        return Err(anyhow!(
            "--token-secret must be at least {MIN_TOKEN_SECRET_LEN} bytes"
        ));
    }

    Ok(Action::Server(Args {
        port,
        dsn,
        token_secret: SecretString::from(token_secret),
        token_issuer: matches
            .get_one::<String>(ARG_TOKEN_ISSUER)
            .cloned()
            .unwrap_or_else(|| "gatehouse".to_string()),
        token_ttl_seconds: matches
            .get_one::<u64>(ARG_TOKEN_TTL_SECONDS)
            .copied()
            .unwrap_or(604_800),
        session_ttl_seconds: matches
            .get_one::<u64>(ARG_SESSION_TTL_SECONDS)
            .copied()
            .unwrap_or(604_800),
        session_cookie_name: matches
            .get_one::<String>(ARG_SESSION_COOKIE_NAME)
            .cloned()
            .unwrap_or_else(|| "session".to_string()),
        session_cookie_secure: matches.get_flag(ARG_SESSION_COOKIE_SECURE),
    }))
}
