use crate::gatehouse::{self, AuthConfig};
use anyhow::Result;
use secrecy::SecretString;
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub token_secret: SecretString,
    pub token_issuer: String,
    pub token_ttl_seconds: u64,
    pub session_ttl_seconds: u64,
    pub session_cookie_name: String,
    pub session_cookie_secure: bool,
}

impl Args {
    fn auth_config(&self) -> AuthConfig {
        AuthConfig::new()
            .with_token_issuer(self.token_issuer.clone())
            .with_token_ttl_seconds(self.token_ttl_seconds)
            .with_session_ttl_seconds(self.session_ttl_seconds)
            .with_session_cookie_name(self.session_cookie_name.clone())
            .with_session_cookie_secure(self.session_cookie_secure)
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let auth_config = args.auth_config();

    debug!("Auth config: {auth_config:?}");

    gatehouse::new(args.port, args.dsn, auth_config, args.token_secret).await
}
