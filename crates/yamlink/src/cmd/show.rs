use crate::cmd::ShowArgs;
use crate::exit::CliResult;

#[cfg(target_os = "linux")]
pub fn run(args: ShowArgs) -> CliResult<i32> {
    use std::io::{self, Read};

    use tracing::info;
    use yamlink_codec::{flags, MessageBuilder};
    use yamlink_session::NetlinkReader;
    use yamlink_transport::{GenlSocket, Transport};

    use crate::exit::{io_error, session_error, transport_error, SUCCESS};

    let socket = GenlSocket::connect().map_err(|err| transport_error("socket failed", err))?;
    let mut reader = NetlinkReader::attach(socket, args.stream)
        .map_err(|err| session_error("reader setup failed", err))?;

    // The reply stream is what the session decodes; the request itself is a
    // bare command.
    let transport = reader.get_mut();
    let family_id = transport
        .resolve_family(&args.family)
        .map_err(|err| transport_error("family lookup failed", err))?;
    let seq = transport.next_seq();
    let port = transport.local_port();
    let request = MessageBuilder::new(
        family_id,
        flags::REQUEST | flags::DUMP,
        seq,
        port,
        args.command,
        args.version,
    );
    transport
        .send(&request.finish())
        .map_err(|err| transport_error("request failed", err))?;
    info!(family = %args.family, command = args.command, "requested dump");

    let mut document = String::new();
    match reader.read_to_string(&mut document) {
        Ok(_) => {
            print!("{document}");
            Ok(SUCCESS)
        }
        Err(err) => {
            let _ = reader.log_error(&mut io::stderr(), "show");
            Err(io_error("show failed", err))
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn run(_args: ShowArgs) -> CliResult<i32> {
    use crate::exit::{CliError, INTERNAL};
    Err(CliError::new(INTERNAL, "netlink is only available on linux"))
}
