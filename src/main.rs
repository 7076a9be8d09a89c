use atc_dashboard::app::{self, Options};
use atc_dashboard::render::{ConsoleSink, PrintSink, QueuedSink, WindowManager};
use atc_dashboard::scanner;
use clap::Parser;
use std::panic::{self, PanicHookInfo};
use std::sync::Arc;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

/// Log to stderr. Only warnings by default so the dashboard stays readable;
/// `RUST_LOG` still overrides.
fn init_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

/// Resolves on Ctrl-C. If the handler cannot be installed, never resolves.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("cannot listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();
    init_logging(options.verbose);

    let sink: Arc<dyn PrintSink> = if options.sync_output {
        Arc::new(ConsoleSink::stdout())
    } else {
        Arc::new(QueuedSink::stdout())
    };
    let windows = WindowManager::new(options.layout(), sink);
    let transport = scanner::transport(options.backend);
    log::info!("using {} backend", options.backend);

    match app::run_with_io(options, transport.as_ref(), windows, shutdown_signal()).await {
        Ok(summary) => {
            log::info!(
                "processed {} advertisements, {} readings from {} sensors",
                summary.events,
                summary.rendered,
                summary.devices
            );
            std::process::exit(EXIT_SUCCESS)
        }
        Err(why) => {
            eprintln!("error: {}", why);
            std::process::exit(EXIT_ERROR);
        }
    }
}
