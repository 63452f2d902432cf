pub mod errata;
pub mod scan;
pub mod worker;

use axum::http::HeaderMap;

use scanhub_core::scheduler::request::Principal;

/// Header the authenticating proxy sets for the requesting user.
pub const USER_HEADER: &str = "x-scanhub-user";
/// Set to `1` for principals allowed to use elevated priorities.
pub const ELEVATED_HEADER: &str = "x-scanhub-elevated";

/// Authentication itself lives in front of this service; these headers are
/// what the proxy forwards.
pub fn principal_from_headers(headers: &HeaderMap) -> Principal {
    let username = headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("anonymous")
        .to_string();
    let elevated = headers
        .get(ELEVATED_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == "1" || value.eq_ignore_ascii_case("true"));
    Principal { username, elevated }
}
