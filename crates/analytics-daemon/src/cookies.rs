//! Builds the `access_token`/`refresh_token`/`logged_in` cookies per
//! spec.md §6: the first two httponly, the marker cookie readable by
//! client-side script.

use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;

use analytics_config::AppConfig;

fn same_site(config: &AppConfig) -> SameSite {
    match config.cookie_samesite.as_str() {
        "strict" => SameSite::Strict,
        "none" => SameSite::None,
        _ => SameSite::Lax,
    }
}

fn base_cookie(config: &AppConfig, name: &'static str, value: String, max_age_secs: i64) -> Cookie<'static> {
    let mut cookie = Cookie::new(name, value);
    cookie.set_path(config.cookie_path.clone());
    cookie.set_secure(config.cookie_secure);
    cookie.set_same_site(same_site(config));
    cookie.set_max_age(Duration::seconds(max_age_secs));
    if let Some(domain) = &config.cookie_domain {
        cookie.set_domain(domain.clone());
    }
    cookie
}

pub fn access_token_cookie(config: &AppConfig, token: String) -> Cookie<'static> {
    let mut cookie = base_cookie(config, "access_token", token, config.access_token_expire_minutes * 60);
    cookie.set_http_only(true);
    cookie
}

pub fn refresh_token_cookie(config: &AppConfig, token: String) -> Cookie<'static> {
    let mut cookie = base_cookie(
        config,
        "refresh_token",
        token,
        config.refresh_token_expire_days * 24 * 60 * 60,
    );
    cookie.set_http_only(true);
    cookie
}

pub fn logged_in_cookie(config: &AppConfig) -> Cookie<'static> {
    base_cookie(config, "logged_in", "true".to_owned(), config.refresh_token_expire_days * 24 * 60 * 60)
}

/// Cookies that clear the three login-state cookies on logout, keeping
/// every attribute but the value and a zero max-age so browsers expire
/// them immediately.
pub fn clear_cookies(config: &AppConfig) -> [Cookie<'static>; 3] {
    [
        { let mut c = base_cookie(config, "access_token", String::new(), 0); c.set_http_only(true); c },
        { let mut c = base_cookie(config, "refresh_token", String::new(), 0); c.set_http_only(true); c },
        base_cookie(config, "logged_in", String::new(), 0),
    ]
}
