use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use payout_ledger::config::LedgerConfig;
use payout_ledger::csv::{read_commands, write_snapshots};
use payout_ledger::gateway::LoggingGateway;
use payout_ledger::logging::init_logging;
use payout_ledger::replay::Replay;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let mut args = env::args().skip(1);
    let Some(path) = args.next() else {
        eprintln!("usage: payout-ledger <events.csv> [config.yaml]");
        return ExitCode::from(2);
    };

    let config = match args.next() {
        Some(config_path) => match LedgerConfig::load(&config_path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{e}");
                return ExitCode::from(2);
            }
        },
        None => LedgerConfig::default(),
    };
    init_logging(&config.log);

    if !path.ends_with(".csv") {
        warn!(path, "input file seems to not be a csv file");
    }

    let commands = match read_commands(path.clone()) {
        Ok(commands) => commands,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let mut replay = Replay::new(config, Arc::new(LoggingGateway), Utc::now());
    let (cmd_sender, cmd_receiver) = tokio::sync::mpsc::channel(16);

    let reader = tokio::spawn(async move {
        for result in commands {
            match result {
                Ok(command) => {
                    if cmd_sender.send(command).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    replay.run(ReceiverStream::new(cmd_receiver)).await;

    // a reader that died early would otherwise look like a short input file
    if let Err(e) = reader.await {
        error!("event reader stopped before end of input: {e}");
        return ExitCode::FAILURE;
    }

    if let Err(e) = write_snapshots(replay.engine().snapshots(), std::io::stdout().lock()) {
        error!("{e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
