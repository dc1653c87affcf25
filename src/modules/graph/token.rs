// Copyright © 2025 mailtrail.dev
// Licensed under MailTrail License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::error::code::ErrorCode;
use crate::modules::error::MailTrailResult;
use crate::modules::settings::cli::MailCredentials;
use crate::raise_error;
use oauth2::{basic::BasicClient, ClientId, ClientSecret, Scope, TokenResponse, TokenUrl};

const GRAPH_DEFAULT_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Client-credentials exchange against the tenant-scoped identity endpoint.
///
/// Tokens are intentionally not cached: every caller gets a fresh one, so a
/// rotated secret takes effect on the next operation.
pub async fn fetch_graph_token(credentials: &MailCredentials) -> MailTrailResult<String> {
    let token_url = TokenUrl::new(token_endpoint(&credentials.tenant_id))
        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;

    let client = BasicClient::new(ClientId::new(credentials.client_id.clone()))
        .set_client_secret(ClientSecret::new(credentials.client_secret.clone()))
        .set_token_uri(token_url);

    let http_client = build_http_client()?;
    let token_response = client
        .exchange_client_credentials()
        .add_scope(Scope::new(GRAPH_DEFAULT_SCOPE.into()))
        .request_async(&http_client)
        .await
        .map_err(|e| {
            raise_error!(
                format!("Graph token exchange rejected: {:#?}", e),
                ErrorCode::UpstreamAuthFailed
            )
        })?;

    Ok(token_response.access_token().secret().to_owned())
}

fn token_endpoint(tenant_id: &str) -> String {
    format!("https://login.microsoftonline.com/{tenant_id}/oauth2/v2.0/token")
}

fn build_http_client() -> MailTrailResult<reqwest::Client> {
    oauth2::reqwest::ClientBuilder::new()
        .redirect(oauth2::reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_endpoint_is_tenant_scoped() {
        assert_eq!(
            token_endpoint("contoso-tenant"),
            "https://login.microsoftonline.com/contoso-tenant/oauth2/v2.0/token"
        );
    }
}
