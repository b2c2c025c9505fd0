use bytes::BytesMut;
use cardstock_debug::{encode_packet, HEADER_SIZE};

use crate::cmd::EncodeArgs;
use crate::exit::{debug_error, CliResult, SUCCESS};
use crate::output::{print_raw, to_hex};

pub fn run(args: EncodeArgs) -> CliResult<i32> {
    let frame = build_frame(&args)?;
    if args.raw {
        print_raw(&frame);
    } else {
        println!("{}", to_hex(&frame));
    }
    Ok(SUCCESS)
}

fn build_frame(args: &EncodeArgs) -> CliResult<BytesMut> {
    let payload = args.packet.payload()?;
    let mut frame = BytesMut::new();
    encode_packet(args.packet.command, &payload, &mut frame)
        .map_err(|err| debug_error("encode failed", err))?;
    if args.zero_checksum {
        // checksum is the last header byte
        frame[HEADER_SIZE] = 0;
    }
    Ok(frame)
}
