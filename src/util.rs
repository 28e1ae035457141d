use actix_web::{
    cookie::{Cookie, SameSite},
    http, HttpResponse,
};
use time::{format_description, OffsetDateTime};

pub fn generate_token() -> String {
    // unique 128-char session token
    random_string::generate(
        128,
        "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789",
    )
}

pub fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

pub fn format_ts(ts: i64) -> String {
    let format =
        format_description::parse("[day].[month].[year] [hour]:[minute]:[second]").unwrap();

    OffsetDateTime::from_unix_timestamp(ts)
        .ok()
        .and_then(|t| t.format(&format).ok())
        .unwrap_or_default()
}

pub fn flash(msg: &str) -> Cookie<'static> {
    Cookie::build("msg", msg.to_owned())
        .path("/")
        .secure(true)
        .http_only(true)
        .same_site(SameSite::Strict)
        .finish()
}

pub fn redirect(location: &str) -> HttpResponse {
    HttpResponse::Found()
        .append_header((http::header::LOCATION, location.to_owned()))
        .finish()
}

pub fn flash_redirect(location: &str, msg: &str) -> HttpResponse {
    HttpResponse::Found()
        .append_header((http::header::LOCATION, location.to_owned()))
        .cookie(flash(msg))
        .finish()
}

#[test]
fn token_shape() {
    let token = generate_token();

    assert_eq!(token.len(), 128);
    assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    assert_ne!(token, generate_token());
}

#[test]
fn timestamp_formatting() {
    assert_eq!(format_ts(0), "01.01.1970 00:00:00");
    assert_eq!(format_ts(1700000000), "14.11.2023 22:13:20");
}
