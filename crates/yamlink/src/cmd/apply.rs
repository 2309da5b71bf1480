use crate::cmd::ApplyArgs;
use crate::exit::CliResult;

#[cfg(target_os = "linux")]
pub fn run(args: ApplyArgs) -> CliResult<i32> {
    use std::io::{self, Read, Write};

    use tracing::info;
    use yamlink_codec::flags;
    use yamlink_session::NetlinkWriter;
    use yamlink_transport::GenlSocket;

    use crate::exit::{io_error, session_error, transport_error, SUCCESS};

    let document = match &args.file {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?,
        None => {
            let mut text = String::new();
            io::stdin()
                .read_to_string(&mut text)
                .map_err(|err| io_error("failed reading stdin", err))?;
            text
        }
    };

    let socket = GenlSocket::connect().map_err(|err| transport_error("socket failed", err))?;
    let mut writer = NetlinkWriter::attach(
        socket,
        &args.family,
        args.version,
        args.command,
        flags::REQUEST,
    )
    .map_err(|err| session_error("writer setup failed", err))?;

    if let Err(err) = writer.write_all(document.as_bytes()) {
        let _ = writer.log_error(&mut io::stderr());
        return Err(io_error("apply failed", err));
    }
    info!(family = %args.family, command = args.command, "document transmitted");
    Ok(SUCCESS)
}

#[cfg(not(target_os = "linux"))]
pub fn run(_args: ApplyArgs) -> CliResult<i32> {
    use crate::exit::{CliError, INTERNAL};
    Err(CliError::new(INTERNAL, "netlink is only available on linux"))
}
