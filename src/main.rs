mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, ConfigCommands, NotesCommands};
use homedash::core::config::API_KEY_ENV;
use homedash::core::docker::ContainerRecord;
use homedash::core::metrics::MetricSample;
use homedash::core::notes::NotePatch;
use homedash::core::{
    ContainerManager, DashboardConfig, HostPaths, MetricsCollector, NotesStore, OpenMeteoClient,
    WeatherService,
};
use homedash::utils::{
    format_duration, format_local, generate_api_key, get_port_description, mask_sensitive,
    truncate_string, usage_bar,
};
use homedash::DashboardError;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => DashboardConfig::default_path()?,
    };
    let mut config = DashboardConfig::load(&config_path)?;
    config.apply_env();

    init_logging(&config.log_level, cli.json_logs);

    match cli.command {
        #[cfg(feature = "server")]
        Commands::Serve { port, host, cors } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            config.server.enable_cors |= cors;
            homedash::server::run(config, Some(config_path)).await?;
        }
        Commands::Status { watch } => {
            handle_status(watch).await?;
        }
        Commands::Containers { refresh } => {
            handle_containers(&config, refresh).await?;
        }
        Commands::Start { id } => {
            let manager = ContainerManager::connect(config.containers.settings())?;
            let id = manager.start(&id).await?;
            println!("{} Container {} started", "✓".green(), id);
        }
        Commands::Stop { id } => {
            let manager = ContainerManager::connect(config.containers.settings())?;
            let id = manager.stop(&id).await?;
            println!("{} Container {} stopped", "✓".green(), id);
        }
        Commands::Restart { id } => {
            let manager = ContainerManager::connect(config.containers.settings())?;
            let id = manager.restart(&id).await?;
            println!("{} Container {} restarted", "✓".green(), id);
        }
        Commands::Update { id } => {
            handle_update(&config, &id).await?;
        }
        Commands::Notes { command } => {
            handle_notes(&config, command)?;
        }
        Commands::Weather { set } => {
            handle_weather(&config, &config_path, set).await?;
        }
        Commands::Config { command } => {
            handle_config(&config, &config_path, command)?;
        }
        Commands::GenerateKey => {
            let key = generate_api_key();
            println!("{}", key);
            eprintln!();
            eprintln!("Add it to your environment or .env file:");
            eprintln!("  export {}=\"{}\"", API_KEY_ENV, key);
        }
    }

    Ok(())
}

/// `RUST_LOG` wins over the configured level
fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_sample(sample: &MetricSample) {
    let colorize = |value: f64| {
        let text = format!("{:5.1}%", value);
        if value >= 90.0 {
            text.red()
        } else if value >= 70.0 {
            text.yellow()
        } else {
            text.green()
        }
    };

    println!("CPU     {} {}", usage_bar(sample.cpu_usage), colorize(sample.cpu_usage));
    println!("Memory  {} {}", usage_bar(sample.memory_usage), colorize(sample.memory_usage));
    println!("Disk    {} {}", usage_bar(sample.disk_usage), colorize(sample.disk_usage));
    println!("Temp    {:.1}°C", sample.temperature);
    println!("Uptime  {}", format_duration(sample.uptime));
}

async fn handle_status(watch: Option<u64>) -> Result<()> {
    let collector = Arc::new(MetricsCollector::new(HostPaths::from_env()));

    let info = collector.system_info()?;
    println!("{}", format!("{} ({} {})", info.hostname, info.system, info.machine).bold());
    println!(
        "Kernel {}  Memory {:.1} GB  Disk {:.1} GB\n",
        info.release, info.memory_total, info.disk_total
    );

    // CPU usage needs two refreshes some time apart
    tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;

    let Some(every) = watch else {
        let sample = collector.collect()?;
        print_sample(&sample);
        return Ok(());
    };

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut ticker = tokio::time::interval(Duration::from_secs(every.max(1)));
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let source = Arc::clone(&collector);
        let sample = tokio::task::spawn_blocking(move || source.collect()).await??;
        println!("{}", format_local(&chrono::Utc::now()).dimmed());
        print_sample(&sample);
        println!();
    }

    Ok(())
}

fn format_ports(container: &ContainerRecord) -> String {
    if container.ports.is_empty() {
        return "-".to_string();
    }
    container
        .ports
        .iter()
        .map(|p| {
            let desc = get_port_description(p.host_port);
            if desc.is_empty() {
                format!("{}->{}/{}", p.host_port, p.container_port, p.protocol)
            } else {
                format!("{}->{}/{} ({})", p.host_port, p.container_port, p.protocol, desc)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

async fn handle_containers(config: &DashboardConfig, refresh: bool) -> Result<()> {
    let manager = ContainerManager::connect(config.containers.settings())?;
    let containers = if refresh {
        manager.refresh().await?
    } else {
        manager.list().await?
    };

    if containers.is_empty() {
        println!("No containers found");
        return Ok(());
    }

    println!(
        "{:<14} {:<24} {:<11} {:<30} {}",
        "ID", "NAME", "STATUS", "IMAGE", "PORTS"
    );
    println!("{}", "-".repeat(100));

    for container in &containers {
        println!(
            "{:<14} {:<24} {:<11} {:<30} {}",
            container.container_id,
            truncate_string(&container.name, 24),
            container.status.as_str().color(container.status.color()),
            truncate_string(&container.image, 30),
            format_ports(container)
        );
    }

    let running = containers.iter().filter(|c| c.status.is_running()).count();
    println!("\n{} running, {} total", running, containers.len());

    Ok(())
}

async fn handle_update(config: &DashboardConfig, id: &str) -> Result<()> {
    let manager = ContainerManager::connect(config.containers.settings())?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .context("Invalid progress template")?,
    );
    spinner.set_message(format!("Updating {} (pulling image, recreating container)", id));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let result = manager.update(id).await;
    spinner.finish_and_clear();

    match result {
        Ok(report) => {
            println!("{} Updated {} ({})", "✓".green(), report.name, report.image);
            println!("  New container id: {}", report.container_id);
            Ok(())
        }
        Err(DashboardError::PartialFailure { container, step, reason }) => {
            eprintln!("{} Update of {} failed at step '{}'", "✗".red(), container, step);
            eprintln!("  {}", reason);
            eprintln!(
                "  {}",
                "The old container was not restarted; inspect it before retrying.".yellow()
            );
            anyhow::bail!("update incomplete")
        }
        Err(e) => Err(e.into()),
    }
}

fn handle_notes(config: &DashboardConfig, command: NotesCommands) -> Result<()> {
    let store = NotesStore::open(&config.notes.data_dir)?;

    match command {
        NotesCommands::List => {
            let notes = store.list();
            if notes.is_empty() {
                println!("No notes");
                return Ok(());
            }
            println!("{:<38} {:<32} {}", "ID", "TITLE", "UPDATED");
            println!("{}", "-".repeat(90));
            for note in notes {
                println!(
                    "{:<38} {:<32} {}",
                    note.id,
                    truncate_string(&note.title, 32),
                    format_local(&note.updated_at)
                );
            }
        }
        NotesCommands::Show { id } => {
            let note = store.get(&id)?;
            println!("{}", note.title.bold());
            println!(
                "{}",
                format!(
                    "created {}  updated {}",
                    format_local(&note.created_at),
                    format_local(&note.updated_at)
                )
                .dimmed()
            );
            println!();
            println!("{}", note.content);
        }
        NotesCommands::Add { title, content } => {
            let note = store.create(&title, &content)?;
            println!("{} Created note {}", "✓".green(), note.id);
        }
        NotesCommands::Edit { id, title, content } => {
            if title.is_none() && content.is_none() {
                anyhow::bail!("Nothing to change: pass --title and/or --content");
            }
            let note = store.update(&id, NotePatch { title, content })?;
            println!("{} Updated note {}", "✓".green(), note.id);
        }
        NotesCommands::Rm { id } => {
            store.delete(&id)?;
            println!("{} Deleted note {}", "✓".green(), id);
        }
    }

    Ok(())
}

async fn handle_weather(config: &DashboardConfig, config_path: &Path, set: Option<String>) -> Result<()> {
    let client = OpenMeteoClient::new(config.weather.request_timeout())?;
    let service = WeatherService::new(
        Arc::new(client),
        config.weather.location(),
        config.weather.cache_ttl(),
        config.weather.forecast_hours,
    );

    if let Some(name) = set {
        let location = service.set_location(&name).await?;
        // Reload so env overrides are not written back to the file
        DashboardConfig::load(config_path)?.set_weather_location(&location, config_path)?;
        println!(
            "{} Location set to {} ({:.4}, {:.4})",
            "✓".green(),
            location.location_name,
            location.latitude,
            location.longitude
        );
        println!("  Saved to {}\n", config_path.display());
    }

    let weather = service.get_weather().await?;
    println!("{}", weather.location_name.bold());
    println!(
        "{:.1}°C  (high {:.1}°C, low {:.1}°C)  humidity {:.0}%  wind {:.1} km/h  code {}",
        weather.temperature,
        weather.high,
        weather.low,
        weather.humidity,
        weather.wind_speed,
        weather.weather_code
    );
    println!();
    for hour in &weather.forecast {
        println!("  {:>5}  {:>5.1}°C  code {}", hour.time_label, hour.temperature, hour.weather_code);
    }

    Ok(())
}

fn handle_config(config: &DashboardConfig, config_path: &Path, command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let mut shown = config.clone();
            shown.server.api_key = shown.server.api_key.map(|k| mask_sensitive(&k, 4));
            let contents = toml::to_string_pretty(&shown).context("Failed to serialize config")?;
            println!("# {}", config_path.display());
            println!("{}", contents);
        }
        ConfigCommands::Validate => {
            let errors = config.validate();
            if errors.is_empty() {
                println!("{} Configuration is valid", "✓".green());
            } else {
                println!("{} Configuration has {} problem(s):", "✗".red(), errors.len());
                for error in &errors {
                    println!("  - {}", error);
                }
                anyhow::bail!("invalid configuration");
            }
        }
        ConfigCommands::Path => {
            println!("{}", config_path.display());
        }
    }

    Ok(())
}
