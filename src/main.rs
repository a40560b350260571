use std::process::ExitCode;

use tracing::{error, info};

use divan::config::FeedConfig;
use divan::{init_tracing, AppContext};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let config = match FeedConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    let app = match AppContext::build(config) {
        Ok(app) => app,
        Err(e) => {
            error!(error = %e, "startup failed");
            return ExitCode::FAILURE;
        }
    };
    info!(language = %app.feed.snapshot().language, "divan starting");

    app.feed.initial_load().await;
    let snapshot = app.feed.snapshot();
    info!(
        state = %snapshot.state,
        poems = snapshot.poems.len(),
        degraded = snapshot.degraded,
        "feed ready"
    );

    for poem in &snapshot.poems {
        println!("── {} · {} ({})", poem.title, poem.poet.name, poem.key());
        println!("{}\n", poem.text);
    }

    if let Some(first) = snapshot.poems.first() {
        let explanation = app.feed.explain(first, false).await;
        println!("{}", explanation.general_meaning);
    }

    for (name, summary) in app.metrics.summary() {
        info!(metric = %name, ?summary, "timing");
    }
    app.feed.teardown();
    ExitCode::SUCCESS
}
