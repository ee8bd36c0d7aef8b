use log::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Route `log` records from the engine into tracing
    let _ = tracing_log::LogTracer::init();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install tracing subscriber: {}", e);
    }

    if let Err(e) = mail_weave::run().await {
        error!("Application error: {:#}", e);
        std::process::exit(1);
    }
}
