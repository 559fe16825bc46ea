//! Quill Worker - offline entry point
//!
//! Runs the generation pipeline once without the network layer: the prompt is
//! taken from the command line (or stdin when no arguments are given) and the
//! continuation is printed to stdout.

use anyhow::Context;
use quill_common::QuillConfig;
use std::io::Read;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("QUILL_CONFIG").unwrap_or_else(|_| "configs/quill.yaml".to_string());
    let config = QuillConfig::from_file(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path))?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("quill_worker={}", config.observability.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let prompt = if args.is_empty() {
        let mut prompt = String::new();
        std::io::stdin()
            .read_to_string(&mut prompt)
            .context("reading prompt from stdin")?;
        prompt
    } else {
        args.join(" ")
    };

    let mut generator = quill_worker::load_generator(&config.worker).with_context(|| {
        format!(
            "loading vocabulary {} and weights {}",
            config.worker.vocab_path.display(),
            config.worker.weights_path.display()
        )
    })?;
    info!(
        "Generating {} tokens with a context window of {}",
        config.worker.tokens_per_request, config.worker.context_window
    );

    let outcome = generator.generate(&prompt).context("generation failed")?;
    println!("{}", outcome.text);

    Ok(())
}
