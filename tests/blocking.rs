use shorts_blocker::blocker::HIDDEN_MARKER;
use shorts_blocker::prelude::*;
use shorts_blocker::relay::Indicator;
use shorts_blocker::scheduler::{Due, FRAME_INTERVAL, Timings};
use shorts_blocker::session::run;
use shorts_blocker::{ChannelMessenger, Hub, Inbound, MemoryStore, ReactiveScheduler, SharedDom};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

const HOME: &str = r#"<body>
    <ytd-guide-entry-renderer id="guide" aria-label="Shorts"><a title="Shorts" href="/shorts"></a></ytd-guide-entry-renderer>
    <yt-chip-cloud-chip-renderer id="chip">Shorts</yt-chip-cloud-chip-renderer>
    <yt-chip-cloud-chip-renderer id="chip-news">News</yt-chip-cloud-chip-renderer>
    <ytd-reel-shelf-renderer id="shelf" style="margin: 4px">
      <ytd-reel-item-renderer id="reel"></ytd-reel-item-renderer>
    </ytd-reel-shelf-renderer>
    <ytd-video-renderer id="short" style="display: block; color: red"><a href="/shorts/q1">q</a></ytd-video-renderer>
    <ytd-video-renderer id="video"><a href="/watch?v=w1">w</a></ytd-video-renderer>
</body>"#;

fn page(html: &str, url: &str) -> Dom {
    Dom::parse_str(html, url).unwrap().with_viewport_width(1280)
}

fn engine(page: &Dom) -> ShortsBlocker {
    let mut engine = ShortsBlocker::new(BlockerConfig::default()).unwrap();
    engine.detect_environment(page);
    engine
}

fn hidden(dom: &Dom, id: &str) -> bool {
    dom.is_display_suppressed(dom.element_by_id(id).unwrap())
}

#[test]
fn filtering_is_idempotent() {
    let mut dom = page(HOME, "https://www.youtube.com/");
    let mut engine = engine(&dom);

    let first = engine.set_state(&mut dom, BlockingState::Blocking);
    assert!(first.hidden_total() >= 4);
    let snapshot = dom.to_html();

    let second = engine.set_state(&mut dom, BlockingState::Blocking);
    assert_eq!(second.hidden_total(), 0);
    assert_eq!(dom.to_html(), snapshot);
}

#[test]
fn block_then_restore_returns_the_original_page() {
    let mut dom = page(HOME, "https://www.youtube.com/");
    let original = dom.to_html();
    let mut engine = engine(&dom);

    engine.set_state(&mut dom, BlockingState::Blocking);
    for id in ["guide", "chip", "shelf", "short"] {
        assert!(hidden(&dom, id), "{id} should be hidden");
    }
    for id in ["chip-news", "video"] {
        assert!(!hidden(&dom, id), "{id} should stay visible");
    }

    engine.set_state(&mut dom, BlockingState::Visible);
    assert_eq!(dom.to_html(), original);
    assert!(!dom.to_html().contains(HIDDEN_MARKER));
}

#[test]
fn search_results_and_unmarked_listings_are_kept() {
    let mut dom = page(
        r#"<body>
            <ytd-search>
              <ytd-video-renderer id="result"><a href="/shorts/s1">found</a></ytd-video-renderer>
            </ytd-search>
            <ytd-rich-grid-renderer>
              <ytd-rich-item-renderer id="mixed"><a href="/shorts/m1">mixed</a></ytd-rich-item-renderer>
            </ytd-rich-grid-renderer>
            <ytd-rich-grid-renderer>
              <ytd-rich-item-renderer id="marked" data-shorts><a href="/shorts/m2">marked</a></ytd-rich-item-renderer>
            </ytd-rich-grid-renderer>
        </body>"#,
        "https://www.youtube.com/results?search_query=cats",
    );
    let mut engine = engine(&dom);
    engine.set_state(&mut dom, BlockingState::Blocking);

    assert!(!hidden(&dom, "result"));
    assert!(!hidden(&dom, "mixed"));
    assert!(hidden(&dom, "marked"));
}

#[test]
fn layout_switch_uses_the_other_selector_set() {
    let html = r#"<body>
        <ytm-reel-shelf-renderer id="mobile-shelf"></ytm-reel-shelf-renderer>
        <ytd-reel-shelf-renderer id="desktop-shelf"></ytd-reel-shelf-renderer>
    </body>"#;
    let mut dom = page(html, "https://www.youtube.com/");
    let mut engine = engine(&dom);
    engine.set_state(&mut dom, BlockingState::Blocking);
    assert!(hidden(&dom, "desktop-shelf"));
    assert!(!hidden(&dom, "mobile-shelf"));

    dom.set_viewport_width(768);
    let report = engine.handle_viewport_change(&mut dom).unwrap();
    assert_eq!(report.sections_hidden, 1);
    assert!(hidden(&dom, "mobile-shelf"));
}

#[test]
fn deep_link_redirects_exactly_once() {
    let mut dom = page("<body></body>", "https://m.youtube.com/shorts/Xy_12?feature=share");
    let mut engine = engine(&dom);

    let report = engine.set_state(&mut dom, BlockingState::Blocking);
    let target = report.redirected_to.unwrap();
    assert_eq!(target.host_str(), Some("m.youtube.com"));
    assert_eq!(target.path(), "/watch");
    assert!(target.query().unwrap().starts_with("v=Xy_12"));

    assert!(engine.set_state(&mut dom, BlockingState::Blocking).redirected_to.is_none());
    assert_eq!(engine.stats().redirects, 1);
}

#[test]
fn mutation_burst_yields_one_pass_per_interval() {
    let timings = Timings::from_config(&BlockerConfig::default());
    let mut scheduler = ReactiveScheduler::new(timings);
    let t0 = Instant::now();

    let scheduled = (0..50u64)
        .filter(|i| scheduler.on_mutation(t0 + Duration::from_millis(*i * 5)))
        .count();
    assert_eq!(scheduled, 1);
    assert_eq!(scheduler.take_due(t0 + FRAME_INTERVAL), Some(Due::Frame));
    assert!(scheduler.on_mutation(t0 + timings.throttle));
}

#[tokio::test]
async fn unreadable_preferences_block_by_default() {
    let store = MemoryStore::new();
    store.fail_reads(true);
    let dom = page(HOME, "https://www.youtube.com/");
    let mut session = Session::new(dom, BlockerConfig::default()).unwrap();
    let report = session.initialize(&store, Instant::now()).await.unwrap();
    assert!(report.hidden_total() > 0);
    assert_eq!(session.state(), BlockingState::Blocking);
}

fn shared(html: &str, url: &str) -> SharedDom {
    Rc::new(RefCell::new(page(html, url)))
}

#[tokio::test(start_paused = true)]
async fn toggle_from_the_hub_reaches_every_site_context() {
    let hub = Hub::new(MemoryStore::new(), ChannelMessenger::new(), BlockerConfig::default());
    assert!(hub.initialize().await);

    let first = shared(HOME, "https://www.youtube.com/");
    let second = shared(HOME, "https://m.youtube.com/");
    let mut sessions = Vec::new();
    for (id, dom) in [(1, first.clone()), (2, second.clone())] {
        let mut session = Session::new(dom.clone(), BlockerConfig::default()).unwrap();
        session.initialize(hub.store(), Instant::now()).await;
        let (inbox, receiver) = mpsc::unbounded_channel::<Inbound>();
        let location = dom.borrow().location();
        hub.register(id, location).await;
        hub.messenger().connect(id, inbox).await;
        sessions.push((session, receiver));
    }
    hub.register(3, url::Url::parse("https://example.com/").unwrap())
        .await;
    assert!(hidden(&first.borrow(), "short"));

    let (second_session, second_inbox) = sessions.pop().unwrap();
    let (first_session, first_inbox) = sessions.pop().unwrap();

    let script = async {
        let response = hub
            .handle(&Command::ToggleShorts { is_blocking: false })
            .await;
        assert_eq!(response, Response::ack());
        assert_eq!(hub.indicator().await, Indicator::for_state(false));
        assert!(!hidden(&first.borrow(), "short"));

        assert_eq!(hub.action_clicked(2).await, Some(true));
        assert!(hidden(&first.borrow(), "short"));
        assert_eq!(hub.handle(&Command::GetStatus).await, Response::status(true));

        hub.messenger().disconnect(1).await;
        hub.messenger().disconnect(2).await;
    };

    let (first_session, second_session, ()) = tokio::join!(
        run(first_session, first_inbox),
        run(second_session, second_inbox),
        script
    );
    assert!(first_session.engine().is_blocking());
    assert!(second_session.engine().is_blocking());
    assert_eq!(first.borrow().observer_count(), 0);
}
