use clap::Parser;
use tracing::{error, info};

use chanlog_logging::ChanlogSubscriberBuilder;
use chanlog_sim::{Cli, Command, SimConfig, SimReport};

fn print_report(report: &SimReport) {
    println!(
        "{} changes in {:?} ({} store updates, {} CAS conflicts)",
        report.changes, report.elapsed, report.update_calls, report.conflicts
    );
    println!(
        "{:<12} {:>8} {:>10} {:>10} {:>10}  ordered",
        "channel", "entries", "bytes", "since", "last"
    );
    for channel in &report.channels {
        println!(
            "{:<12} {:>8} {:>10} {:>10} {:>10}  {}",
            channel.name,
            channel.entries,
            channel.bytes,
            channel.since,
            channel.last_sequence,
            if channel.ordered { "yes" } else { "NO" }
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => {
            let config = SimConfig::from_args(&args)?;
            let _guard = ChanlogSubscriberBuilder::new()
                .with_config(config.logging.clone())
                .init()?;

            let report = chanlog_sim::run(&config).await?;
            print_report(&report);

            if !report.all_ordered() {
                let unordered = report.unordered_channels();
                error!(channels = ?unordered, "Channel logs out of sequence order");
                anyhow::bail!("{} channel log(s) out of sequence order: {:?}", unordered.len(), unordered);
            }
            info!("All channel logs are in sequence order");
        }

        Command::ShowConfig(args) => {
            let config = SimConfig::from_args(&args)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
