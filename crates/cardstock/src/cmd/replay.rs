use std::fs;
use std::time::{Duration, Instant};

use cardstock_debug::{DebugError, DebugSession, DecoderState, Outcome};
use cardstock_serial::LoopbackPort;
use tracing::{debug, warn};

use crate::cmd::{parse_duration, parse_hex, ReplayArgs};
use crate::exit::{io_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_outcome, OutcomeRecord, OutputFormat};

pub fn run(args: ReplayArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.session.to_config()?;
    let interval = parse_duration(&args.chunk_interval)?;
    let capture = read_capture(&args)?;
    let chunk_size = usize::try_from(args.chunk_size)
        .map_err(|_| CliError::usage("--chunk-size is too large"))?;

    let mut session = DebugSession::with_config(LoopbackPort::new(), config);
    let start = Instant::now();
    let mut seq = 0usize;
    let mut aborted = 0usize;

    debug!(bytes = capture.len(), chunk_size, "replaying capture");

    for (tick, chunk) in capture.chunks(chunk_size).enumerate() {
        session.port_mut().push(chunk);
        let now = tick_time(start, interval, tick)?;

        loop {
            let outcome = session.process_once_at(now);
            if outcome.is_pending() {
                break;
            }
            let acks = session.port_mut().take_writes().len();
            seq += 1;
            print_outcome(
                &OutcomeRecord::new(seq, &outcome, session.is_debug_mode(), acks),
                format,
            );
            match outcome {
                Outcome::Error(DebugError::Transport(err)) => {
                    return Err(crate::exit::transport_error("replay failed", err));
                }
                Outcome::Error(_) => aborted += 1,
                _ => {}
            }
        }
    }

    let state = session.decoder_state();
    if state != DecoderState::Idle {
        warn!(?state, "capture ended inside a packet");
        aborted += 1;
    }

    if args.strict && aborted > 0 {
        return Err(CliError::new(
            DATA_INVALID,
            format!("{aborted} packet(s) aborted during replay"),
        ));
    }
    Ok(SUCCESS)
}

/// Simulated clock reading for the chunk delivered at `tick`.
fn tick_time(start: Instant, interval: Duration, tick: usize) -> CliResult<Instant> {
    u32::try_from(tick)
        .ok()
        .and_then(|tick| interval.checked_mul(tick))
        .and_then(|offset| start.checked_add(offset))
        .ok_or_else(|| CliError::usage("--chunk-interval is too large for this capture"))
}

fn read_capture(args: &ReplayArgs) -> CliResult<Vec<u8>> {
    let bytes = fs::read(&args.file)
        .map_err(|err| io_error(&format!("failed reading {}", args.file.display()), err))?;
    if !args.hex_input {
        return Ok(bytes);
    }
    let text = String::from_utf8(bytes).map_err(|_| {
        CliError::new(
            DATA_INVALID,
            format!("{} is not valid hex text", args.file.display()),
        )
    })?;
    parse_hex(&text)
}
