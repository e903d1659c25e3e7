use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use portico::{
    ApplicationParts, GracefulShutdown, ServerSettings, SettingsOverrides, build_application,
    config::{LogFormat, loader::try_load_proxy_rules, validation::validate_rule},
    tracing_setup,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    /// Directory of static assets (also where `proxy.config.json` is looked up)
    #[clap(long, global = true)]
    static_dir: Option<String>,

    /// Proxy rule document, overriding `<static-dir>/proxy.config.json`
    #[clap(long, global = true)]
    proxy_config: Option<String>,

    #[clap(short, long, global = true)]
    port: Option<u16>,

    #[clap(long, global = true)]
    host: Option<String>,

    /// Settings file (TOML, YAML or JSON)
    #[clap(short, long, global = true)]
    settings: Option<String>,

    #[clap(long, value_enum, global = true)]
    log_format: Option<LogFormatArg>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the server (default)
    Serve,
    /// Check the proxy rule document and exit
    Validate,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LogFormatArg {
    Json,
    Pretty,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Json => LogFormat::Json,
            LogFormatArg::Pretty => LogFormat::Pretty,
        }
    }
}

impl Args {
    fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            settings_file: self.settings.clone(),
            host: self.host.clone(),
            port: self.port,
            static_dir: self.static_dir.clone(),
            proxy_config: self.proxy_config.clone(),
            log_format: self.log_format.map(Into::into),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let settings = ServerSettings::load(&args.overrides()).wrap_err("Failed to load settings")?;

    match args.command.unwrap_or(Commands::Serve) {
        Commands::Validate => validate_command(&settings).await,
        Commands::Serve => serve(settings).await,
    }
}

async fn serve(settings: ServerSettings) -> Result<()> {
    tracing_setup::init_tracing(&settings.log)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;

    let app = build_application(&settings, ApplicationParts::default()).await?;
    for failure in &app.plugins_failed {
        tracing::warn!(plugin = failure.plugin_name(), error = %failure, "Plugin not loaded");
    }

    let shutdown = Arc::new(GracefulShutdown::new());
    let sweeper = app.spawn_limiter_sweeper(shutdown.subscribe());
    let signals = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { shutdown.run_signal_handler().await })
    };

    let addr: SocketAddr = settings
        .listen_addr()
        .parse()
        .wrap_err_with(|| format!("Invalid listen address {}", settings.listen_addr()))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    tracing::info!(
        addr = %addr,
        static_dir = %app.plugin_config.static_path.display(),
        plugins = app.plugins_loaded.len(),
        proxy_rules = app.gateway.route_count(),
        "Portico server starting"
    );

    let server = axum::serve(
        listener,
        app.router
            .into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.signal())
    .into_future();
    tokio::pin!(server);

    let result = tokio::select! {
        result = &mut server => result.context("Server error"),
        _ = shutdown.signal() => {
            // In-flight requests get the drain deadline to finish.
            match shutdown.wait_for_drain(&mut server).await {
                Some(result) => result.context("Server error"),
                None => Ok(()),
            }
        }
    };

    signals.abort();
    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    tracing::info!("Graceful shutdown completed");
    result
}

/// Validate the proxy rule document and exit.
async fn validate_command(settings: &ServerSettings) -> Result<()> {
    let plugin_config = settings.plugin_config()?;
    let path: PathBuf = plugin_config.resolved_proxy_config_path();

    println!("Validating proxy rules: {}", path.display());

    let entries = match try_load_proxy_rules(Some(&path)).await {
        Ok(Some(entries)) => entries,
        Ok(None) => {
            println!("No proxy configuration found; proxying is disabled.");
            return Ok(());
        }
        Err(e) => {
            eprintln!("Proxy configuration is invalid: {e}");
            std::process::exit(1);
        }
    };

    let mut invalid = 0;
    for entry in &entries {
        match validate_rule(entry) {
            Ok(rule) => println!("  ok    #{} {} -> {}", entry.index, rule.path, rule.target),
            Err(e) => {
                invalid += 1;
                println!("  skip  {e}");
            }
        }
    }

    println!(
        "{} of {} rules valid",
        entries.len() - invalid,
        entries.len()
    );
    if invalid > 0 {
        std::process::exit(1);
    }
    Ok(())
}
