use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use bytes::BytesMut;
use cardstock_debug::{decode_packet, encode_packet, Packet};
use cardstock_serial::SerialSocket;
use tracing::debug;

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{
    debug_error, io_error, transport_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT,
};
use crate::output::{print_packet, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let payload = args.packet.payload()?;

    let mut frame = BytesMut::new();
    encode_packet(args.packet.command, &payload, &mut frame)
        .map_err(|err| debug_error("encode failed", err))?;

    let mut stream =
        SerialSocket::connect(&args.path).map_err(|err| transport_error("connect failed", err))?;
    stream
        .write_all(&frame)
        .and_then(|()| stream.flush())
        .map_err(|err| io_error("send failed", err))?;
    debug!(command = args.packet.command, bytes = frame.len(), "packet sent");

    if args.wait {
        let packet = wait_for_response(&mut stream, wait_timeout)?;
        print_packet(&packet, format);
    }

    Ok(SUCCESS)
}

fn wait_for_response(stream: &mut UnixStream, timeout: Duration) -> CliResult<Packet> {
    stream
        .set_read_timeout(Some(timeout))
        .map_err(|err| io_error("receive failed", err))?;

    let mut buf = BytesMut::with_capacity(64);
    let mut chunk = [0u8; 256];
    loop {
        if let Some(packet) = decode_packet(&mut buf, usize::from(u16::MAX))
            .map_err(|err| debug_error("receive failed", err))?
        {
            return Ok(packet);
        }

        match stream.read(&mut chunk) {
            Ok(0) => {
                return Err(CliError::new(
                    FAILURE,
                    "receive failed: device closed the line before responding",
                ))
            }
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(err) if matches!(
                err.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            ) =>
            {
                return Err(CliError::new(
                    TIMEOUT,
                    format!("no response within {timeout:?}"),
                ))
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(io_error("receive failed", err)),
        }
    }
}
