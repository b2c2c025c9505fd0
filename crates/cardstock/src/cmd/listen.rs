use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use cardstock_debug::{DebugError, DebugSession, Dispatch, Outcome};
use cardstock_serial::{SerialSocket, TransportError};
use tracing::info;

use crate::cmd::{parse_duration, ListenArgs};
use crate::exit::{debug_error, transport_error, CliError, CliResult, SUCCESS};
use crate::output::{print_outcome, OutcomeRecord, OutputFormat};

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.session.to_config()?;
    let tick = parse_duration(&args.tick)?;
    let socket =
        SerialSocket::bind(&args.path).map_err(|err| transport_error("bind failed", err))?;
    info!(path = ?socket.path(), "listening for serial peers");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut printed = 0usize;

    while running.load(Ordering::SeqCst) {
        let port = socket
            .accept()
            .map_err(|err| transport_error("accept failed", err))?;
        let mut session = DebugSession::with_config(port, config.clone());

        while running.load(Ordering::SeqCst) {
            let outcome = session.process_once();
            match &outcome {
                Outcome::Pending => {
                    thread::sleep(tick);
                    continue;
                }
                Outcome::Error(DebugError::Transport(TransportError::Closed)) => {
                    info!("serial peer detached");
                    break;
                }
                _ => {}
            }

            printed = printed.saturating_add(1);
            let acks = usize::from(matches!(
                outcome,
                Outcome::Completed(Dispatch::DebugEnabled | Dispatch::DebugDisabled)
            ));
            print_outcome(
                &OutcomeRecord::new(printed, &outcome, session.is_debug_mode(), acks),
                format,
            );

            if let Outcome::Error(err @ DebugError::Transport(_)) = outcome {
                return Err(debug_error("session failed", err));
            }

            if let Some(count) = args.count {
                if printed >= count {
                    return Ok(SUCCESS);
                }
            }
        }
    }

    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
