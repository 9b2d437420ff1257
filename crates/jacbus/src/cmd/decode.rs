use jacbus_frame::{split, Frame};

use crate::cmd::{parse_number, DecodeArgs};
use crate::exit::{CliError, CliResult, DATA_INVALID, SUCCESS, USAGE};
use crate::output::{parse_hex, print_decoded_frame, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let bytes = parse_hex(&args.hex)
        .ok_or_else(|| CliError::new(USAGE, "frame is not valid hex"))?;
    let class = match &args.class {
        Some(text) => Some(
            parse_number(text)
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| CliError::new(USAGE, format!("invalid class: {text}")))?,
        ),
        None => None,
    };

    let frame = Frame::from_bytes(&bytes)
        .map_err(|err| CliError::new(DATA_INVALID, format!("frame rejected: {err}")))?;

    let packets = split(&frame)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| CliError::new(DATA_INVALID, format!("bad sub-record: {err}")))?;

    print_decoded_frame(
        frame.device_id,
        frame.flags.is_command(),
        &packets,
        class,
        format,
    );
    Ok(SUCCESS)
}
