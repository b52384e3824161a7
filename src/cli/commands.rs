use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "marketpulse", about = "Scheduled chip-flow and media digest pipeline")]
pub struct Cli {
    /// Print posts to stdout instead of delivering them
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the scheduler until Ctrl-C
    Serve,
    /// Trigger a job now and print its run report
    Run {
        /// Job name (chip_daily, video_digest)
        job: String,
        /// Backfill the chip job for this trading date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,
    },
    /// Analyze one stock's institutional flow
    Chip {
        stock: String,
        /// Trading date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date: Option<String>,
    },
    /// Trend delta of one stock over a single window
    Trend {
        stock: String,
        /// Window in trading days
        #[arg(long, default_value = "5")]
        window: usize,
        #[arg(long)]
        date: Option<String>,
    },
    /// List jobs with state and next trigger
    Jobs,
    /// List processed markers
    Markers,
    /// Recent delivery outcomes, newest first
    Deliveries {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Run a chat command (e.g. `exec chip_trend 2330 foreign 5`)
    Exec {
        command: String,
        args: Vec<String>,
    },
}
