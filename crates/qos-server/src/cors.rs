//! CORS layer built from settings.

use std::str::FromStr;
use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, Method};
use qos_settings::CorsSettings;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

/// Build the CORS layer.
///
/// A wildcard origin combined with credentials mirrors the request origin,
/// since browsers reject `*` on credentialed responses. Entries that do not
/// parse are logged and skipped.
pub fn cors_layer(settings: &CorsSettings) -> CorsLayer {
    let wildcard = settings.allowed_origins.iter().any(|o| o == "*");
    let origin = match (wildcard, settings.allow_credentials) {
        (true, true) => AllowOrigin::mirror_request(),
        (true, false) => AllowOrigin::any(),
        (false, _) => AllowOrigin::list(parse_all::<HeaderValue>("origin", &settings.allowed_origins)),
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(parse_all::<Method>("method", &settings.allowed_methods))
        .allow_headers(parse_all::<HeaderName>("header", &settings.allowed_headers))
        .expose_headers(parse_all::<HeaderName>("header", &settings.exposed_headers))
        .allow_credentials(settings.allow_credentials)
        .max_age(Duration::from_secs(settings.max_age_secs))
}

fn parse_all<T: FromStr>(what: &str, values: &[String]) -> Vec<T> {
    values
        .iter()
        .filter_map(|v| {
            let parsed = T::from_str(v.trim()).ok();
            if parsed.is_none() {
                warn!(value = %v, "ignoring invalid CORS {what}");
            }
            parsed
        })
        .collect()
}
