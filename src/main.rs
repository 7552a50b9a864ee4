use std::{str::FromStr, sync::Arc};

use clap::Parser;
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use campo_ocr::{
    extract::Extractor, ocr::TesseractBackend, pipeline::AppState, prelude::*, server,
};

/// OCR uploaded images and extract caller-chosen fields with an LLM.
#[derive(Debug, Parser)]
#[clap(
    version,
    after_help = r#"
Environment Variables:
  - OPENAI_API_BASE (optional): Override the server URL.
  - OPENAI_API_KEY: The OpenAI key to use.
  - CAMPO_OCR_MODEL (optional): Extraction model (default: gpt-4o-mini).
  - CAMPO_OCR_TESSDATA (optional): Override the Tesseract data directory.
  - PORT (optional): Listen port when --port is not given.

  These variables may be set in a standard `.env` file.
"#
)]
struct Opts {
    /// Address to bind.
    #[clap(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on. Falls back to $PORT, then 3000.
    #[clap(long)]
    port: Option<u16>,
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing.
    let directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_filter(env_filter);
    tracing_subscriber::registry().with(subscriber).init();

    // Call our real `main` function now that logging is set up.
    real_main().await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main() -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    let port = match opts.port {
        Some(port) => port,
        None => std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000),
    };

    let state = AppState {
        backend: Arc::new(TesseractBackend::new(
            std::env::var("CAMPO_OCR_TESSDATA").ok(),
        )),
        extractor: Arc::new(Extractor::openai()?),
    };
    server::serve(&opts.host, port, state).await
}
