//! The two cookies the UI relies on.
//!
//! `pploy_user` remembers who last operated a lock (one year). `pploy_flash`
//! carries a one-shot message across a redirect (one minute) and is cleared
//! by the status API when read. Values are percent-encoded so that flash
//! messages may contain spaces, commas and semicolons.

use axum::http::{HeaderMap, HeaderValue, header};
use chrono::{TimeDelta, Utc};

pub const USER_COOKIE: &str = "pploy_user";
pub const FLASH_COOKIE: &str = "pploy_flash";

const USER_MAX_AGE_SECS: i64 = 360 * 24 * 60 * 60;
const FLASH_MAX_AGE_SECS: i64 = 60;

/// Value of cookie `name` from the request, decoded. Empty values count as absent.
pub fn read(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| percent_decode(value.trim_matches('"')))
        .filter(|value| !value.is_empty())
}

pub fn current_user(headers: &HeaderMap) -> Option<String> {
    read(headers, USER_COOKIE)
}

pub fn user_cookie(user: &str) -> HeaderValue {
    set_cookie(USER_COOKIE, user, USER_MAX_AGE_SECS)
}

pub fn flash_cookie(message: &str) -> HeaderValue {
    set_cookie(FLASH_COOKIE, message, FLASH_MAX_AGE_SECS)
}

/// Expire the flash cookie immediately.
pub fn clear_flash_cookie() -> HeaderValue {
    HeaderValue::from_static("pploy_flash=; Path=/; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT")
}

fn set_cookie(name: &str, value: &str, max_age_secs: i64) -> HeaderValue {
    let expires = (Utc::now() + TimeDelta::seconds(max_age_secs)).format("%a, %d %b %Y %H:%M:%S GMT");
    let cookie = format!(
        "{}={}; Path=/; Max-Age={}; Expires={}; SameSite=Lax",
        name,
        percent_encode(value),
        max_age_secs,
        expires
    );
    // percent_encode leaves only visible ASCII
    HeaderValue::from_str(&cookie).unwrap_or_else(|_| HeaderValue::from_static(""))
}

fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && let Some(hi) = bytes.get(i + 1).and_then(|b| hex_value(*b))
            && let Some(lo) = bytes.get(i + 2).and_then(|b| hex_value(*b))
        {
            out.push((hi << 4) | lo);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    (byte as char).to_digit(16).map(|d| d as u8)
}
