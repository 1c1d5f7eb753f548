use anyhow::Result;
use clap::Parser;
use finetune::cli::Cli;
use finetune::pipeline;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Setup File Logging
    let file_appender = tracing_appender::rolling::daily("logs", "finetune.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // 2. Setup Console Logging
    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    // 3. Combine Subscribers
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer()) // Stdout
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        ) // File
        .init();

    // 4. Setup Panic Hook
    std::panic::set_hook(Box::new(|panic_info| {
        let payload = panic_info.payload();
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            *s
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "Unknown panic"
        };

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        tracing::error!(target: "panic", "🔥 CRASH detected at {}: {}", location, msg);
        eprintln!("🔥 CRASH detected at {}: {}", location, msg);
    }));

    tracing::info!("🚀 finetune started.");
    tracing::debug!("--key {:?} is accepted but unused", cli.key);

    let config = cli.finetune_config()?;
    let report = pipeline::run(&config)?;

    println!("loss before training: {:.2}", report.loss_before);
    println!("loss after training: {:.2}", report.loss_after);
    if report.train.interrupted {
        tracing::warn!("⚠️ Training was interrupted at step {}", report.train.global_step);
    }

    Ok(())
}
