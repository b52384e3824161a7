use clap::Parser;
use marketpulse::application::commands::parse_date;
use marketpulse::cli::commands::{Cli, Commands};
use marketpulse::config::Config;
use marketpulse::domain::entities::job_spec::JobKind;
use marketpulse::MarketPulse;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("marketpulse=info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let mp = match MarketPulse::new(&config, cli.dry_run) {
        Ok(mp) => mp,
        Err(e) => {
            eprintln!("Error initializing marketpulse: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run_command(mp, cli.command).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run_command(mp: MarketPulse, cmd: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        Commands::Serve => {
            let (tx, rx) = watch::channel(false);
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => info!("Ctrl-C received, shutting down"),
                    Err(e) => warn!(error = %e, "cannot listen for Ctrl-C"),
                }
                let _ = tx.send(true);
            });
            mp.serve(rx).await;
        }
        Commands::Run { job, date } => {
            let report = match date {
                Some(d) => {
                    let kind: JobKind = job.parse()?;
                    if kind != JobKind::ChipDaily {
                        return Err(format!("--date only applies to {}", JobKind::ChipDaily).into());
                    }
                    mp.run_chip_for(parse_date(&d)?).await?
                }
                None => mp.run_job(&job).await?,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_success() {
                return Err(report.summary_line().into());
            }
        }
        Commands::Chip { stock, date } => {
            let date = date.as_deref().map(parse_date).transpose()?;
            let result = mp.analyze_chip(&stock, date).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Trend { stock, window, date } => {
            let date = date.as_deref().map(parse_date).transpose()?;
            let result = mp.analyze_trend(&stock, window, date).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Jobs => {
            println!("{}", serde_json::to_string_pretty(&mp.job_status())?);
        }
        Commands::Markers => {
            println!("{}", serde_json::to_string_pretty(&mp.markers()?)?);
        }
        Commands::Deliveries { limit } => {
            println!("{}", serde_json::to_string_pretty(&mp.deliveries(limit)?)?);
        }
        Commands::Exec { command, args } => {
            println!("{}", mp.invoke(&command, &args).await);
        }
    }
    Ok(())
}
