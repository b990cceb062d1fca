use std::time::Duration;

use clap::Parser;
use irym_rotatescu::{Direction, Outcome, Rotate90, Workflow, WorkflowConfig};
use tracing::{error, info, Level};

/// DICOM series rotation tool:
/// query a series, retrieve it, rotate every image
/// and store the result as a new series
#[derive(Debug, Parser)]
#[command(version)]
struct App {
    /// socket address to the Q/R and storage SCP
    #[arg(default_value = "127.0.0.1:4242")]
    addr: String,
    /// verbose mode
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
    /// the calling AE title
    #[arg(long = "calling-ae-title", default_value = "ROTATE-SCU")]
    calling_ae_title: String,
    /// the called AE title
    #[arg(long = "called-ae-title", default_value = "ANY-SCP")]
    called_ae_title: String,
    /// the maximum PDU length
    #[arg(
        long = "max-pdu-length",
        default_value = "16384",
        value_parser(clap::value_parser!(u32).range(4096..=131_072))
    )]
    max_pdu_length: u32,
    /// seconds to wait for each response, 0 to wait indefinitely
    #[arg(long = "timeout", default_value = "30")]
    timeout: u64,
    /// the query/retrieve level
    #[arg(long = "level", default_value = "SERIES")]
    level: String,
    /// the modality to query
    #[arg(short = 'm', long = "modality", default_value = "MG")]
    modality: String,
    /// the series description of the new series
    #[arg(long = "series-description", default_value = "Rotated series")]
    series_description: String,
    /// the direction of the quarter turn
    #[arg(long = "direction", value_enum, default_value_t = Direction::CounterClockwise)]
    direction: Direction,
}

fn main() {
    let App {
        addr,
        verbose,
        calling_ae_title,
        called_ae_title,
        max_pdu_length,
        timeout,
        level,
        modality,
        series_description,
        direction,
    } = App::parse();

    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(if verbose { Level::DEBUG } else { Level::INFO })
            .finish(),
    )
    .unwrap_or_else(|e| {
        error!("{}", snafu::Report::from_error(e));
    });

    let config = WorkflowConfig {
        addr,
        calling_ae_title,
        called_ae_title,
        max_pdu_length,
        read_timeout: (timeout > 0).then(|| Duration::from_secs(timeout)),
        query_level: level,
        modality,
        series_description,
        ..Default::default()
    };

    match Workflow::new(config, Rotate90::new(direction)).run() {
        Ok(Outcome::NotFound) => info!("No study found"),
        Ok(Outcome::Stored {
            study_instance_uid,
            series_instance_uid,
            instances,
        }) => info!(
            "Stored new series {} ({} instance(s)) in study {}",
            series_instance_uid, instances, study_instance_uid
        ),
        Err(e) => {
            if e.is_association_failure() {
                error!("Association failed: {}", snafu::Report::from_error(e));
            } else {
                error!("{}", snafu::Report::from_error(e));
            }
            std::process::exit(-2);
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::App;

    #[test]
    fn verify_cli() {
        App::command().debug_assert();
    }
}
