//! Captive-portal redirect heuristics.
//!
//! Phones probe a well-known URL after joining a network and decide whether
//! to pop up a sign-in sheet from the reply. Different vendors react to
//! different reply shapes, so the catch-all picks one per client.

/// How to send a probing client to the portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectStrategy {
    /// `302 Found` with a `Location` header.
    Found,
    /// HTML page with a meta refresh.
    MetaRefresh,
    /// HTML page with a meta refresh and a script fallback.
    MetaRefreshScript,
}

const XIAOMI_MARKERS: [&str; 3] = ["MiuiBrowser", "XiaoMi", "MI "];
const APPLE_MARKERS: [&str; 3] = ["iPhone", "iPad", "Mac"];
const APPLE_PROBE_HOST: &str = "captive.apple.com";

/// Pick the redirect strategy from the request's `Host` and `User-Agent`.
///
/// # Example
///
/// ```
/// use audio_link_esp32::portal::{classify, RedirectStrategy};
///
/// assert_eq!(classify(Some("captive.apple.com"), None), RedirectStrategy::MetaRefresh);
/// assert_eq!(classify(None, Some("Mozilla/5.0 (Linux; Android 13)")), RedirectStrategy::MetaRefreshScript);
/// ```
pub fn classify(host: Option<&str>, user_agent: Option<&str>) -> RedirectStrategy {
    let ua = user_agent.unwrap_or("");
    if XIAOMI_MARKERS.iter().any(|m| ua.contains(m)) {
        return RedirectStrategy::Found;
    }
    let apple_host = host.is_some_and(|h| h.contains(APPLE_PROBE_HOST));
    if apple_host || APPLE_MARKERS.iter().any(|m| ua.contains(m)) {
        return RedirectStrategy::MetaRefresh;
    }
    RedirectStrategy::MetaRefreshScript
}

/// HTML body for the page-based strategies; `None` for [`RedirectStrategy::Found`].
pub fn redirect_page(strategy: RedirectStrategy, target: &str) -> Option<String> {
    match strategy {
        RedirectStrategy::Found => None,
        RedirectStrategy::MetaRefresh => Some(format!(
            "<!DOCTYPE html><html><head>\
             <meta http-equiv='refresh' content='0;url={target}'>\
             </head><body>\
             <h2>Redirecting to the setup page...</h2>\
             <p><a href='{target}'>Tap here</a></p>\
             </body></html>"
        )),
        RedirectStrategy::MetaRefreshScript => Some(format!(
            "<!DOCTYPE html><html><head>\
             <meta http-equiv='refresh' content='0;url={target}'>\
             <script>window.location.href='{target}';</script>\
             </head><body>\
             <h2>Redirecting to the setup page...</h2>\
             <p>If nothing happens, <a href='{target}'>tap here</a></p>\
             </body></html>"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xiaomi_gets_302() {
        let ua = "Mozilla/5.0 (Linux; U; Android 12; MI 11) MiuiBrowser/17.0";
        assert_eq!(classify(None, Some(ua)), RedirectStrategy::Found);
        assert_eq!(
            classify(None, Some("Dalvik/2.1.0 XiaoMi/MiuiBrowser")),
            RedirectStrategy::Found
        );
    }

    #[test]
    fn test_xiaomi_wins_over_apple_markers() {
        // "MI " and "Mac" both present: the 302 rule is checked first.
        let ua = "MI 9 Macintosh";
        assert_eq!(classify(None, Some(ua)), RedirectStrategy::Found);
    }

    #[test]
    fn test_apple_by_user_agent_or_host() {
        let ua = "CaptiveNetworkSupport-443 wispr (iPhone)";
        assert_eq!(classify(None, Some(ua)), RedirectStrategy::MetaRefresh);
        assert_eq!(
            classify(Some("captive.apple.com"), Some("curl/8.0")),
            RedirectStrategy::MetaRefresh
        );
    }

    #[test]
    fn test_everyone_else_gets_script_page() {
        assert_eq!(classify(None, None), RedirectStrategy::MetaRefreshScript);
        assert_eq!(
            classify(Some("connectivitycheck.gstatic.com"), Some("Dalvik/2.1.0")),
            RedirectStrategy::MetaRefreshScript
        );
    }

    #[test]
    fn test_pages() {
        let target = "http://192.168.4.1/";
        assert!(redirect_page(RedirectStrategy::Found, target).is_none());

        let meta = redirect_page(RedirectStrategy::MetaRefresh, target).unwrap();
        assert!(meta.contains("content='0;url=http://192.168.4.1/'"));
        assert!(!meta.contains("<script>"));

        let script = redirect_page(RedirectStrategy::MetaRefreshScript, target).unwrap();
        assert!(script.contains("window.location.href='http://192.168.4.1/'"));
    }
}
