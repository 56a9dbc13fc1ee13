//! fos-fetch
//!
//! Run one GET through the fetch pipeline and print its events.
//!
//! Usage: `fos-fetch <url> [origin]`. Without an origin the request is
//! same-origin. Set `FOS_FETCH_CONFIG` to a JSON `FetchConfig` file to
//! override the defaults.

use anyhow::{Context, Result, bail};
use fos_xhr::{FetchConfig, FetchEvent, FetchRequest, Fetcher};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fos_xhr=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut args = std::env::args().skip(1);
    let Some(url) = args.next() else {
        bail!("usage: fos-fetch <url> [origin]");
    };
    let origin = args.next();

    let config = match std::env::var_os("FOS_FETCH_CONFIG") {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config {}", path.to_string_lossy()))?;
            serde_json::from_str::<FetchConfig>(&raw).context("parsing config")?
        }
        None => FetchConfig::default(),
    };

    let mut request = FetchRequest::parse("GET", &url)?;
    if let Some(origin) = &origin {
        request = request.with_origin(origin);
    }

    let fetcher = Fetcher::new(config);
    let mut handle = fetcher.dispatch(request);

    while let Some(event) = handle.next_event().await {
        match event {
            FetchEvent::Request { method, url, .. } => println!("> {method} {url}"),
            FetchEvent::Redirect { status, from, to } => println!("~ {status} {from} -> {to}"),
            FetchEvent::Response {
                status,
                status_text,
                headers,
                ..
            } => {
                println!("< {status} {status_text}");
                for (name, value) in headers.iter() {
                    println!("< {name}: {value}");
                }
            }
            FetchEvent::Data(body) => {
                println!();
                println!("{}", String::from_utf8_lossy(&body));
            }
            FetchEvent::End => {}
            FetchEvent::Error(e) => eprintln!("error: {e}"),
            FetchEvent::Abort => eprintln!("aborted"),
        }
    }

    let result = handle.finish().await;
    if let Some(e) = result.error() {
        bail!("fetch failed: {e}");
    }
    Ok(())
}
