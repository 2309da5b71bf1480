use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    println!("yamlink {}", env!("CARGO_PKG_VERSION"));
    if args.extended {
        println!("rustc min: {}", env!("CARGO_PKG_RUST_VERSION"));
    }
    Ok(SUCCESS)
}
