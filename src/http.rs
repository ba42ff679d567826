//! Shared blocking HTTP plumbing for outbound calls.
use std::time::Duration;

/// Agent that reports non-success statuses as responses, not errors, so
/// callers can read the provider's error body.
pub fn agent(timeout: Duration) -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build();
    ureq::Agent::new_with_config(config)
}

/// Attach the passthrough bearer token, when one is configured.
pub fn authorize<B>(
    request: ureq::RequestBuilder<B>,
    credential: &crate::config::Credential,
) -> ureq::RequestBuilder<B> {
    match credential {
        crate::config::Credential::Bearer(token) => {
            request.header("Authorization", format!("Bearer {token}"))
        }
        crate::config::Credential::ApiKey(_) | crate::config::Credential::None => request,
    }
}
