use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "mediahub-server")]
#[command(about = "One API over Plex, Jellyfin, Emby, Subsonic and friends", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "mediahub-server.yaml")]
    config: String,

    /// Log at debug level for this crate.
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let default_filter = if args.debug {
        "mediahub_rs=debug,tower_http=debug"
    } else {
        "mediahub_rs=info,tower_http=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if args.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    if let Err(e) = mediahub_rs::run(&args.config, args.debug).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
