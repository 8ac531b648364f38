//! User agent sent on every gRPC and REST call.
//!
//! Format: `spice-rs/<version> (<os> <release>; <arch>)`, e.g.
//! `spice-rs/0.1.0 (Linux 6.5.0; x86_64)`.

use os_info::{Type as OsType, Version};
use std::sync::OnceLock;

const CLIENT_NAME: &str = "spice-rs";

static USER_AGENT: OnceLock<String> = OnceLock::new();

/// The process-wide user agent string. Computed once.
pub fn user_agent() -> &'static str {
    USER_AGENT.get_or_init(|| {
        let info = os_info::get();
        let os = match info.os_type() {
            OsType::Unknown => "unknown".to_string(),
            other => other.to_string(),
        };
        let release = match info.version() {
            Version::Unknown => None,
            other => Some(other.to_string()),
        };
        let arch = info
            .architecture()
            .unwrap_or(std::env::consts::ARCH)
            .to_string();
        format_user_agent(env!("CARGO_PKG_VERSION"), &os, release.as_deref(), &arch)
    })
}

fn format_user_agent(version: &str, os: &str, release: Option<&str>, arch: &str) -> String {
    let os = sanitize(os);
    let platform = match release.map(sanitize).filter(|r| !r.is_empty()) {
        Some(release) => format!("{os} {release}"),
        None => os,
    };
    format!("{CLIENT_NAME}/{version} ({platform}; {})", sanitize(arch))
}

/// Keep header-safe characters and drop the comment delimiters.
fn sanitize(part: &str) -> String {
    part.chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .filter(|c| !matches!(c, '(' | ')' | ';'))
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_user_agent() {
        assert_eq!(
            format_user_agent("1.2.3", "Mac OS", Some("14.4.1"), "arm64"),
            "spice-rs/1.2.3 (Mac OS 14.4.1; arm64)"
        );
    }

    #[test]
    fn test_format_without_release() {
        assert_eq!(
            format_user_agent("0.1.0", "Windows", None, "x86_64"),
            "spice-rs/0.1.0 (Windows; x86_64)"
        );
        assert_eq!(
            format_user_agent("0.1.0", "Windows", Some("  "), "x86_64"),
            "spice-rs/0.1.0 (Windows; x86_64)"
        );
    }

    #[test]
    fn test_sanitize_strips_delimiters_and_non_ascii() {
        assert_eq!(sanitize("Linux (Rolling); é"), "Linux Rolling");
    }

    #[test]
    fn test_user_agent_is_header_safe() {
        let ua = user_agent();
        assert!(ua.starts_with("spice-rs/"));
        assert!(ua.is_ascii());
        assert!(http_safe(ua));
        assert!(std::ptr::eq(ua, user_agent()));
    }

    fn http_safe(value: &str) -> bool {
        value.bytes().all(|b| b == b' ' || b.is_ascii_graphic())
    }
}
