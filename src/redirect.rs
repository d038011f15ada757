use anyhow::Result;
use regex::Regex;
use tracing::{debug, info};
use url::Url;

/// Query parameter tagging a location this guard produced
pub const REDIRECT_MARKER: &str = "sb_redirect";

/// Rewrites Shorts deep links to the regular watch page. The marker on the
/// rewritten location is what stops a second rewrite.
pub struct RedirectGuard {
    path: Regex,
}

impl RedirectGuard {
    pub fn new() -> Result<Self> {
        let path = Regex::new(r"^/shorts/([^/]+)")
            .map_err(|e| anyhow::anyhow!("Failed to compile regex: {}", e))?;
        Ok(Self { path })
    }

    /// The item id of a `/shorts/<id>` location
    pub fn shorts_id(&self, location: &Url) -> Option<String> {
        let raw = self.path.captures(location.path())?.get(1)?.as_str();
        let id = urlencoding::decode(raw).ok()?;
        let id = id.trim();
        if id.is_empty() {
            None
        } else {
            Some(id.to_string())
        }
    }

    pub fn is_marked(location: &Url) -> bool {
        location.query_pairs().any(|(key, _)| key == REDIRECT_MARKER)
    }

    /// Canonical watch location for `location`, tagged with the marker
    pub fn canonical(&self, location: &Url) -> Option<Url> {
        let id = self.shorts_id(location)?;
        let mut target = location.clone();
        target.set_path("/watch");
        target.set_query(None);
        target.set_fragment(None);
        target
            .query_pairs_mut()
            .append_pair("v", &id)
            .append_pair(REDIRECT_MARKER, "1");
        Some(target)
    }

    /// Where to send the page, if anywhere. Marked locations are left alone.
    pub fn check(&self, location: &Url) -> Option<Url> {
        if Self::is_marked(location) {
            debug!(%location, "location carries redirect marker, not rewriting");
            return None;
        }
        let target = self.canonical(location)?;
        info!(from = %location, to = %target, "redirecting Shorts deep link");
        Some(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[test]
    fn rewrites_deep_link_and_leaves_the_result_alone() {
        let guard = RedirectGuard::new().unwrap();
        let target = guard.check(&url("https://www.youtube.com/shorts/abc123")).unwrap();
        assert_eq!(
            target.as_str(),
            "https://www.youtube.com/watch?v=abc123&sb_redirect=1"
        );
        assert!(guard.check(&target).is_none());
    }

    #[test]
    fn fresh_visit_to_the_same_item_rewrites_again() {
        let guard = RedirectGuard::new().unwrap();
        let deep_link = url("https://www.youtube.com/shorts/abc123");
        let first = guard.check(&deep_link).unwrap();
        assert_eq!(guard.check(&deep_link), Some(first));
    }

    #[test]
    fn marked_shorts_location_is_left_alone() {
        let guard = RedirectGuard::new().unwrap();
        assert!(guard
            .check(&url("https://m.youtube.com/shorts/abc123?sb_redirect=1"))
            .is_none());
    }

    #[test]
    fn keeps_host_and_drops_extra_segments() {
        let guard = RedirectGuard::new().unwrap();
        let target = guard
            .canonical(&url("https://m.youtube.com/shorts/a%2Db_c/extra?feature=share#t=3"))
            .unwrap();
        assert_eq!(target.as_str(), "https://m.youtube.com/watch?v=a-b_c&sb_redirect=1");
    }

    #[test]
    fn ignores_non_deep_links() {
        let guard = RedirectGuard::new().unwrap();
        assert!(guard.check(&url("https://www.youtube.com/shorts")).is_none());
        assert!(guard.check(&url("https://www.youtube.com/shorts/")).is_none());
        assert!(guard.check(&url("https://www.youtube.com/watch?v=abc123")).is_none());
    }
}
