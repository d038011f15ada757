//! Decides whether a candidate element is a Shorts item.
//!
//! The strict check runs during filter passes and leans toward precision:
//! an element is only hidden when nothing suggests it is a legitimate search
//! result or part of a mixed listing. The lenient check runs during restore
//! and leans toward recall, because un-hiding something that was never
//! hidden costs nothing.

use anyhow::Result;
use regex::Regex;

use crate::dom::{NodeId, Page};
use crate::types::EnvironmentState;

/// Path prefix of a Shorts deep link
pub const CATEGORY_PATH: &str = "/shorts/";

const DESKTOP_SEARCH_CONTAINERS: &[&str] = &["ytd-search", "ytd-search-pyv-renderer"];
const MOBILE_SEARCH_CONTAINERS: &[&str] = &["ytm-search", "ytd-search"];

const DESKTOP_LISTINGS: &[&str] = &[
    "ytd-rich-grid-renderer",
    "ytd-item-section-renderer",
    "ytd-watch-next-secondary-results-renderer",
];
const MOBILE_LISTINGS: &[&str] = &[
    "ytm-rich-grid-renderer",
    "ytm-item-section-renderer",
    "ytm-section-list-renderer",
];

/// Fragments the lenient check looks for in tags, classes and labels
const LENIENT_FRAGMENTS: &[&str] = &["short", "reel"];

pub struct Classifier {
    label: Regex,
}

impl Classifier {
    pub fn new() -> Result<Self> {
        let label = Regex::new(r"(?i)\bshorts\b")
            .map_err(|e| anyhow::anyhow!("Failed to compile regex: {}", e))?;
        Ok(Self { label })
    }

    /// Strict classification, first matching rule wins:
    /// identity, then guarded link match, then subtree markers.
    pub fn is_filtered_item<P: Page + ?Sized>(
        &self,
        page: &P,
        element: NodeId,
        env: &EnvironmentState,
    ) -> bool {
        if has_category_identity(page, element) {
            return true;
        }

        if self.has_category_link(page, element) {
            if self.in_search_results(page, element, env) {
                return false;
            }
            if self.in_unmarked_listing(page, element, env) {
                return false;
            }
            return true;
        }

        std::iter::once(element)
            .chain(page.descendants(element))
            .any(|node| has_category_marker(page, node))
    }

    /// Lenient classification used by the restore pass
    pub fn is_category_related<P: Page + ?Sized>(&self, page: &P, element: NodeId) -> bool {
        if page.has_attribute(element, "is-shorts") || page.has_attribute(element, "data-shorts") {
            return true;
        }
        let signals = [
            page.tag_name(element),
            page.attribute(element, "class"),
            page.attribute(element, "aria-label"),
            page.attribute(element, "title"),
            page.attribute(element, "href"),
        ];
        signals.iter().flatten().any(|value| {
            let value = value.to_lowercase();
            LENIENT_FRAGMENTS
                .iter()
                .any(|fragment| value.contains(fragment))
        })
    }

    /// Whether a control names the category in its text or label, or links
    /// into it. The name has to appear as a whole word, so chips such as
    /// "Shortstop drills" stay visible.
    pub fn is_category_label<P: Page + ?Sized>(&self, page: &P, element: NodeId) -> bool {
        let text = page.text_content(element);
        if self.label.is_match(text.trim()) {
            return true;
        }
        let labelled = ["aria-label", "title"]
            .iter()
            .filter_map(|name| page.attribute(element, name))
            .any(|label| self.label.is_match(&label));
        labelled
            || std::iter::once(element)
                .chain(page.descendants(element))
                .any(|node| {
                    page.tag_name(node).as_deref() == Some("a")
                        && page
                            .attribute(node, "href")
                            .is_some_and(|href| href.to_lowercase().contains("shorts"))
                })
    }

    fn has_category_link<P: Page + ?Sized>(&self, page: &P, element: NodeId) -> bool {
        std::iter::once(element)
            .chain(page.descendants(element))
            .any(|node| {
                page.tag_name(node).as_deref() == Some("a")
                    && page
                        .attribute(node, "href")
                        .is_some_and(|href| href.contains(CATEGORY_PATH))
            })
    }

    fn in_search_results<P: Page + ?Sized>(
        &self,
        page: &P,
        element: NodeId,
        env: &EnvironmentState,
    ) -> bool {
        let containers = if env.is_mobile_layout {
            MOBILE_SEARCH_CONTAINERS
        } else {
            DESKTOP_SEARCH_CONTAINERS
        };
        nearest_with_tag(page, element, containers).is_some()
    }

    fn in_unmarked_listing<P: Page + ?Sized>(
        &self,
        page: &P,
        element: NodeId,
        env: &EnvironmentState,
    ) -> bool {
        let listings = if env.is_mobile_layout {
            MOBILE_LISTINGS
        } else {
            DESKTOP_LISTINGS
        };
        let Some(listing) = page
            .ancestors(element)
            .into_iter()
            .find(|node| tag_in(page, *node, listings))
        else {
            return false;
        };
        !page
            .descendants(listing)
            .into_iter()
            .any(|node| has_category_marker(page, node))
    }
}

/// Tag or declared content type identifies the element outright
fn has_category_identity<P: Page + ?Sized>(page: &P, node: NodeId) -> bool {
    if page.has_attribute(node, "is-shorts") {
        return true;
    }
    if page
        .attribute(node, "data-content-type")
        .is_some_and(|kind| kind.eq_ignore_ascii_case("shorts"))
    {
        return true;
    }
    page.tag_name(node)
        .is_some_and(|tag| tag.contains("reel") || tag.contains("shorts"))
}

/// Any category-specific attribute, class fragment or tag on this node
fn has_category_marker<P: Page + ?Sized>(page: &P, node: NodeId) -> bool {
    if has_category_identity(page, node) || page.has_attribute(node, "data-shorts") {
        return true;
    }
    page.attribute(node, "class").is_some_and(|class| {
        let class = class.to_lowercase();
        class.contains("shorts") || class.contains("reel")
    })
}

fn tag_in<P: Page + ?Sized>(page: &P, node: NodeId, tags: &[&str]) -> bool {
    page.tag_name(node)
        .is_some_and(|tag| tags.contains(&tag.as_str()))
}

fn nearest_with_tag<P: Page + ?Sized>(page: &P, node: NodeId, tags: &[&str]) -> Option<NodeId> {
    std::iter::once(node)
        .chain(page.ancestors(node))
        .find(|candidate| tag_in(page, *candidate, tags))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Dom;

    fn page(body: &str) -> Dom {
        Dom::parse_str(&format!("<body>{body}</body>"), "https://www.youtube.com/").unwrap()
    }

    fn desktop() -> EnvironmentState {
        EnvironmentState::default()
    }

    fn classify(body: &str, id: &str) -> bool {
        let dom = page(body);
        let node = dom.element_by_id(id).unwrap();
        Classifier::new().unwrap().is_filtered_item(&dom, node, &desktop())
    }

    #[test]
    fn identity_attributes_win() {
        assert!(classify(r#"<ytd-rich-item-renderer id="x" is-shorts></ytd-rich-item-renderer>"#, "x"));
        assert!(classify(r#"<div id="x" data-content-type="shorts"></div>"#, "x"));
        assert!(classify(r#"<ytd-reel-item-renderer id="x"></ytd-reel-item-renderer>"#, "x"));
    }

    #[test]
    fn standalone_shorts_link_is_positive() {
        assert!(classify(
            r#"<ytd-video-renderer id="x"><a href="/shorts/abc123">clip</a></ytd-video-renderer>"#,
            "x"
        ));
    }

    #[test]
    fn shorts_link_inside_search_results_is_not_positive() {
        assert!(!classify(
            r#"<ytd-search><ytd-video-renderer id="x" class="reel-like">
                 <a href="/shorts/abc123">clip</a>
               </ytd-video-renderer></ytd-search>"#,
            "x"
        ));
    }

    #[test]
    fn unmarked_listing_guards_link_match() {
        assert!(!classify(
            r#"<ytd-rich-grid-renderer>
                 <ytd-rich-item-renderer id="x"><a href="/shorts/abc123"></a></ytd-rich-item-renderer>
                 <ytd-rich-item-renderer><a href="/watch?v=zzz"></a></ytd-rich-item-renderer>
               </ytd-rich-grid-renderer>"#,
            "x"
        ));
    }

    #[test]
    fn marked_listing_lets_link_match_through() {
        assert!(classify(
            r#"<ytd-rich-grid-renderer>
                 <ytd-rich-shelf-renderer is-shorts>
                   <ytd-rich-item-renderer id="x"><a href="/shorts/abc123"></a></ytd-rich-item-renderer>
                 </ytd-rich-shelf-renderer>
               </ytd-rich-grid-renderer>"#,
            "x"
        ));
    }

    #[test]
    fn subtree_marker_without_link() {
        assert!(classify(
            r#"<ytm-video-with-context-renderer id="x"><div class="shorts-badge"></div></ytm-video-with-context-renderer>"#,
            "x"
        ));
        assert!(!classify(
            r#"<ytd-video-renderer id="x"><a href="/watch?v=abc"></a></ytd-video-renderer>"#,
            "x"
        ));
    }

    #[test]
    fn lenient_check_over_matches() {
        let dom = page(
            r#"<ytd-guide-entry-renderer id="guide" aria-label="Shorts"></ytd-guide-entry-renderer>
               <a id="nav" href="/shorts"></a>
               <div id="shelf" class="reel-shelf"></div>
               <div id="plain" class="feed"></div>"#,
        );
        let classifier = Classifier::new().unwrap();
        for id in ["guide", "nav", "shelf"] {
            assert!(classifier.is_category_related(&dom, dom.element_by_id(id).unwrap()), "{id}");
        }
        assert!(!classifier.is_category_related(&dom, dom.element_by_id("plain").unwrap()));
    }

    #[test]
    fn label_matches_whole_word() {
        let dom = page(
            r#"<yt-chip-cloud-chip-renderer id="a"> Shorts </yt-chip-cloud-chip-renderer>
               <yt-chip-cloud-chip-renderer id="b">Shortstop drills</yt-chip-cloud-chip-renderer>
               <yt-chip-cloud-chip-renderer id="c" aria-label="Show shorts"></yt-chip-cloud-chip-renderer>"#,
        );
        let classifier = Classifier::new().unwrap();
        assert!(classifier.is_category_label(&dom, dom.element_by_id("a").unwrap()));
        assert!(!classifier.is_category_label(&dom, dom.element_by_id("b").unwrap()));
        assert!(classifier.is_category_label(&dom, dom.element_by_id("c").unwrap()));
    }

    #[test]
    fn chip_linking_into_the_category_counts_as_a_label() {
        let dom = page(
            r#"<yt-chip-cloud-chip-renderer id="icon"><a href="/feed/shorts"><img></a></yt-chip-cloud-chip-renderer>
               <yt-chip-cloud-chip-renderer id="music"><a href="/feed/music">Music</a></yt-chip-cloud-chip-renderer>"#,
        );
        let classifier = Classifier::new().unwrap();
        assert!(classifier.is_category_label(&dom, dom.element_by_id("icon").unwrap()));
        assert!(!classifier.is_category_label(&dom, dom.element_by_id("music").unwrap()));
    }
}
