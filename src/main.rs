mod gateway;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use knight_channels::whatsapp::WhatsAppChannel;
use knight_core::{
    config::{self, shellexpand, Config, ConfigSource},
    context::Context,
    traits::Channel,
};
use knight_providers::build_provider;
use knight_shadow::AntiDelete;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "knight",
    version,
    about = "Knight: WhatsApp anti-delete relay with an optional AI responder"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to WhatsApp and start relaying.
    Start,
    /// Show configuration, session and provider status.
    Status,
    /// Send a one-shot prompt to the configured AI provider.
    Ask {
        /// The message to send.
        #[arg(trailing_var_arg = true)]
        message: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (cfg, source) = config::load(&cli.config)?;
    let _log_guard = init_logging(&cfg)?;
    if source == ConfigSource::Defaults {
        info!("config file not found at {}, using defaults", cli.config);
    }

    match cli.command {
        Commands::Start => start(cfg).await?,
        Commands::Status => status(&cli.config, &cfg).await,
        Commands::Ask { message } => {
            if message.is_empty() {
                anyhow::bail!("no message provided. Usage: knight ask <message>");
            }
            let provider = build_provider(&cfg.provider)?;
            let context = Context::new(&message.join(" "))
                .with_system_prompt(&cfg.responder.system_prompt);
            let response = provider.complete(&context).await?;
            println!("{}", response.text);
        }
    }

    Ok(())
}

/// Stdout plus a daily-rolling file under `{data_dir}/logs`.
///
/// `RUST_LOG` wins over the configured level. Keep the guard alive for the
/// life of the process or buffered lines are lost.
fn init_logging(cfg: &Config) -> anyhow::Result<WorkerGuard> {
    let log_dir = PathBuf::from(shellexpand(&cfg.knight.data_dir)).join("logs");
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log dir {}", log_dir.display()))?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "knight.log"));

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.knight.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .try_init()?;

    Ok(guard)
}

async fn start(cfg: Config) -> anyhow::Result<()> {
    cfg.validate()?;

    let allowed_users = match &cfg.channel.whatsapp {
        Some(wa) if wa.enabled => wa.allowed_users.clone(),
        _ => anyhow::bail!("WhatsApp is not enabled. Set [channel.whatsapp] enabled = true."),
    };
    let data_dir = cfg.knight.data_dir.clone();
    let channel: Arc<dyn Channel> = Arc::new(WhatsAppChannel::new(&data_dir));

    let anti_delete = if cfg.anti_delete.enabled {
        let temp_dir = cfg.anti_delete.temp_dir_path(&data_dir);
        Some(AntiDelete::start(
            cfg.anti_delete.clone(),
            temp_dir,
            channel.clone(),
        )?)
    } else {
        info!("anti-delete disabled");
        None
    };

    let responder = if cfg.responder.enabled {
        let provider = build_provider(&cfg.provider)?;
        if !provider.is_available().await {
            warn!(
                "provider '{}' is not reachable right now; replies may fail",
                provider.name()
            );
        }
        Some(Arc::new(gateway::Responder::new(
            Arc::from(provider),
            channel.clone(),
            cfg.responder.clone(),
            allowed_users,
        )))
    } else {
        None
    };

    if anti_delete.is_none() && responder.is_none() {
        anyhow::bail!("nothing to do: both anti_delete and responder are disabled");
    }

    let owner = cfg.anti_delete.owner.clone();
    let guard = if responder.is_some() {
        let path = PathBuf::from(shellexpand(&data_dir)).join(gateway::BLOCKLIST_FILE);
        let guard = gateway::SecurityGuard::open(cfg.security.clone(), &owner, &path)
            .with_context(|| format!("failed to load blocklist {}", path.display()))?;
        Some(Arc::new(guard))
    } else {
        None
    };

    let mut gw = gateway::Gateway::new(channel, anti_delete, responder);
    if let Some(guard) = guard {
        gw = gw.with_security(guard);
    }
    if cfg.commands.enabled {
        if owner.trim().is_empty() {
            warn!("owner commands need anti_delete.owner; commands are off");
        } else {
            gw = gw.with_owner_commands(&owner);
        }
    }

    println!("{} starting...", cfg.knight.name);
    Arc::new(gw).run().await
}

async fn status(config_path: &str, cfg: &Config) {
    println!("{} status\n", cfg.knight.name);
    println!("Config: {config_path}");
    println!("Data dir: {}", shellexpand(&cfg.knight.data_dir));
    if let Err(e) = cfg.validate() {
        println!("Config problem: {e}");
    }
    println!();

    let ad = &cfg.anti_delete;
    if ad.enabled {
        println!("  anti-delete: enabled");
        println!("    owner: {}", ad.owner_jid());
        println!("    report owner deletions: {}", ad.report_owner_deletions);
        println!(
            "    max age: {}s, sweep every {}s, capacity {}",
            ad.max_shadow_age().as_secs(),
            ad.sweep_interval().as_secs(),
            ad.max_entries
        );
        println!(
            "    temp dir: {}",
            ad.temp_dir_path(&cfg.knight.data_dir).display()
        );
    } else {
        println!("  anti-delete: disabled");
    }

    match &cfg.channel.whatsapp {
        Some(wa) if wa.enabled => println!(
            "  whatsapp: {}",
            if WhatsAppChannel::has_session(&cfg.knight.data_dir) {
                "paired"
            } else {
                "not paired (run `knight start` and scan the QR code)"
            }
        ),
        Some(_) => println!("  whatsapp: disabled"),
        None => println!("  whatsapp: not configured"),
    }

    println!(
        "  owner commands: {}",
        if cfg.commands.enabled { "enabled" } else { "disabled" }
    );

    if !cfg.responder.enabled {
        println!("  responder: disabled");
        return;
    }
    let sec = &cfg.security;
    if sec.enabled {
        println!(
            "  security: {} msg/min, auto-block {} after {} warnings",
            sec.max_messages_per_minute,
            if sec.auto_block { "on" } else { "off" },
            sec.auto_block_threshold
        );
    } else {
        println!("  security: anti-spam off (blocklist still applies)");
    }
    match build_provider(&cfg.provider) {
        Ok(provider) => println!(
            "  responder: {} {}",
            provider.name(),
            if provider.is_available().await {
                "available"
            } else {
                "unreachable"
            }
        ),
        Err(e) => println!("  responder: {e}"),
    }
}
