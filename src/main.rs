use clap::Parser;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;

use murmur::config::{self, Config};
use murmur::network::wire::PeerAddr;
use murmur::node::GossipNode;
use murmur::shutdown::ShutdownManager;

/// Interval between status lines in the log
const STATUS_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "murmurd")]
#[command(about = "Murmur gossip node daemon", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "murmur.toml")]
    config: String,

    /// host or host:port to listen on
    #[arg(long)]
    listen_addr: Option<String>,

    /// Connect-only: never accept inbound peers
    #[arg(long)]
    no_listen: bool,

    /// Peer to dial at startup (host:port), repeatable
    #[arg(long, value_name = "ADDR")]
    connect: Vec<String>,

    /// Channel to tune in to, repeatable
    #[arg(long, value_name = "CHANNEL")]
    tune: Vec<String>,

    #[arg(short, long)]
    verbose: bool,

    #[arg(long)]
    generate_config: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Ok(hostname) = hostname::get() {
        if let Ok(hostname_str) = hostname.into_string() {
            let short_name = hostname_str.split('.').next().unwrap_or(&hostname_str);
            eprintln!("\n╔═══════════════════════════════════════════╗");
            eprintln!("║  🖥️  NODE: {:<30} ║", short_name);
            eprintln!("╚═══════════════════════════════════════════╝\n");
        }
    }

    if args.generate_config {
        match Config::default().save_to_file(&args.config) {
            Ok(()) => {
                println!("✅ Generated default config at: {}", args.config);
                return;
            }
            Err(e) => {
                eprintln!("❌ Failed to generate config: {}", e);
                std::process::exit(1);
            }
        }
    }

    let mut config = match Config::load_or_create(&args.config) {
        Ok(cfg) => {
            println!("✓ Loaded configuration from {}", args.config);
            cfg
        }
        Err(e) => {
            eprintln!("❌ Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = apply_args(&mut config, &args) {
        eprintln!("❌ {}", e);
        std::process::exit(1);
    }

    let _log_guard = setup_logging(&config.logging, args.verbose);

    let version = env!("CARGO_PKG_VERSION");
    let git_hash = option_env!("GIT_HASH").unwrap_or("unknown");
    println!("\n🚀 Murmur gossip daemon v{} ({})", version, git_hash);
    println!("═══════════════════════════════════════════════════════");
    if config.network.listen {
        println!(
            "📡 Listening on {}:{}",
            config.network.listen_address, config.network.port
        );
    } else {
        println!("📡 Connect-only mode");
    }
    println!("📻 Channels: {:?}", config.gossip.channels);
    println!();

    let node = match GossipNode::from_config(&config) {
        Ok(node) => node,
        Err(e) => {
            tracing::error!("❌ Failed to create node: {}", e);
            std::process::exit(1);
        }
    };

    node.register_on_new_message(|signature, record| {
        tracing::info!(
            "📬 [{}] {} ({})",
            record.channel,
            String::from_utf8_lossy(&record.payload),
            signature.short()
        );
    });
    node.register_on_channel_tune_in(|channel| tracing::debug!("Subscribed to '{}'", channel));
    node.register_on_channel_tune_out(|channel| {
        tracing::debug!("Unsubscribed from '{}'", channel)
    });

    if let Err(e) = node.start().await {
        tracing::error!("❌ Failed to start node: {}", e);
        std::process::exit(1);
    }

    let mut shutdown_manager = ShutdownManager::new(node.clone());

    let bootstrap = config.network.bootstrap_peers.clone();
    if !bootstrap.is_empty() {
        let node = node.clone();
        shutdown_manager.register_task(tokio::spawn(async move {
            connect_bootstrap_peers(node, bootstrap).await;
        }));
    }

    let status_node = node.clone();
    let token = shutdown_manager.token();
    shutdown_manager.register_task(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STATUS_INTERVAL);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => log_status(&status_node),
            }
        }
    }));

    shutdown_manager.wait_for_shutdown().await;
}

fn apply_args(config: &mut Config, args: &Args) -> Result<(), String> {
    if let Some(listen) = &args.listen_addr {
        if listen.contains(':') {
            let addr = PeerAddr::from_str(listen)?;
            config.network.listen_address = addr.host;
            config.network.port = addr.port;
        } else {
            config.network.listen_address = listen.clone();
        }
    }
    if args.no_listen {
        config.network.listen = false;
    }
    config.network.bootstrap_peers.extend(args.connect.iter().cloned());
    for channel in &args.tune {
        if !config.gossip.channels.contains(channel) {
            config.gossip.channels.push(channel.clone());
        }
    }
    config.validate().map_err(|e| e.to_string())
}

async fn connect_bootstrap_peers(node: Arc<GossipNode>, peers: Vec<String>) {
    for peer in peers {
        let addr = match PeerAddr::from_str(&peer) {
            Ok(addr) => addr,
            Err(e) => {
                tracing::warn!("Skipping bootstrap peer: {}", e);
                continue;
            }
        };
        match node.peer_add(addr.clone()).await {
            Ok(id) => tracing::info!("🔗 Connected to bootstrap peer {} as {}", addr, id),
            Err(e) => tracing::warn!("Bootstrap peer {} unavailable: {}", addr, e),
        }
    }
}

fn log_status(node: &GossipNode) {
    let networker = node.networker();
    tracing::info!(
        "📊 {} peer(s), {} candidate(s), {} live message(s), integrated: {}",
        networker.peer_count(),
        networker.candidates().len(),
        node.pile().live_len(),
        networker.is_integrated()
    );
}

fn setup_logging(config: &config::LoggingConfig, verbose: bool) -> Option<WorkerGuard> {
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if verbose { "trace" } else { &config.level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Detect if running under systemd/journald
    let is_systemd =
        std::env::var("JOURNAL_STREAM").is_ok() || std::env::var("INVOCATION_ID").is_ok();

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    let short_hostname = hostname.split('.').next().unwrap_or(&hostname).to_string();

    let (writer, guard, to_file) = if config.output == "file" {
        let path = std::path::Path::new(&config.file_path);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."));
        let file_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "murmurd.log".into());
        let appender = tracing_appender::rolling::daily(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        (BoxMakeWriter::new(non_blocking), Some(guard), true)
    } else {
        (BoxMakeWriter::new(std::io::stdout), None, false)
    };

    match log_style(&config.format, is_systemd, to_file) {
        LogStyle::Json => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_thread_ids(false)
                .init();
        }
        LogStyle::Pretty => {
            fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(!to_file)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_timer(CustomTimer {
                    hostname: short_hostname,
                })
                .pretty()
                .init();
        }
        LogStyle::Journald => {
            // journald already adds timestamp and hostname
            fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false)
                .without_time()
                .compact()
                .init();
        }
        LogStyle::Compact => {
            fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(!to_file)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false)
                .with_timer(CustomTimer {
                    hostname: short_hostname,
                })
                .compact()
                .init();
        }
    }

    guard
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogStyle {
    Json,
    Pretty,
    Compact,
    /// Untimed compact lines for journald on stdout
    Journald,
}

fn log_style(format: &str, is_systemd: bool, to_file: bool) -> LogStyle {
    match format {
        "json" => LogStyle::Json,
        _ if is_systemd && !to_file => LogStyle::Journald,
        "pretty" => LogStyle::Pretty,
        _ => LogStyle::Compact,
    }
}

// UTC time and short hostname
struct CustomTimer {
    hostname: String,
}

impl tracing_subscriber::fmt::time::FormatTime for CustomTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = chrono::Utc::now();

        // "2025-12-10 18:09:43.150 [server1]"
        write!(
            w,
            "{}.{:03} [{}]",
            now.format("%Y-%m-%d %H:%M:%S"),
            now.timestamp_subsec_millis(),
            self.hostname
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_style_follows_format() {
        assert_eq!(log_style("json", false, false), LogStyle::Json);
        assert_eq!(log_style("pretty", false, false), LogStyle::Pretty);
        assert_eq!(log_style("compact", false, false), LogStyle::Compact);
        assert_eq!(log_style("pretty", false, true), LogStyle::Pretty);
    }

    #[test]
    fn test_journald_gets_untimed_lines_unless_json() {
        assert_eq!(log_style("pretty", true, false), LogStyle::Journald);
        assert_eq!(log_style("compact", true, false), LogStyle::Journald);
        assert_eq!(log_style("json", true, false), LogStyle::Json);
        assert_eq!(log_style("pretty", true, true), LogStyle::Pretty);
    }
}
