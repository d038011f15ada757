use anyhow::{Context, Result, bail};
use shorts_blocker::prelude::*;
use tracing_subscriber::EnvFilter;
use url::Url;

const DEFAULT_LOCATION: &str = "https://www.youtube.com/";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else {
        bail!("usage: shorts-blocker <file.html> [url] [viewport-width]");
    };
    let location = args.next().unwrap_or_else(|| DEFAULT_LOCATION.to_string());
    let location = Url::parse(&location).with_context(|| format!("invalid url: {location}"))?;
    let width = args
        .next()
        .map(|raw| raw.parse::<u32>().with_context(|| format!("invalid width: {raw}")))
        .transpose()?;

    let html = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading {path}"))?;

    let mut page = Dom::parse(&html, location);
    if let Some(width) = width {
        page.set_viewport_width(width);
    }

    let environment = shorts_blocker::detect(&page.signals());
    let mut blocker = ShortsBlocker::new(BlockerConfig::for_environment(&environment))?;
    blocker.detect_environment(&page);

    let report = blocker.set_state(&mut page, BlockingState::Blocking);
    eprintln!("🛡️  Shorts Blocker");
    eprintln!(
        "   sections: {}  items: {}  navigation: {}  chips: {}  failures: {}",
        report.sections_hidden,
        report.items_hidden,
        report.navigation_hidden,
        report.controls_hidden,
        report.failures
    );
    if let Some(target) = &report.redirected_to {
        eprintln!("   redirected to {target}");
    }

    println!("{}", page.to_html());
    Ok(())
}
