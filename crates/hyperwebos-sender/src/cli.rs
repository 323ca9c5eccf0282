//! Command line → [`GrabberConfig`].
//!
//! Values given on the command line override the `--config` file. Any
//! problem exits with usage on stderr before a resource is touched.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::{value_parser, Arg, Command};
use hyperwebos_core::config::MAX_FPS;
use hyperwebos_core::{ConfigError, GrabberConfig};

pub fn command() -> Command {
    Command::new("hyperion-webos")
        .version(env!("CARGO_PKG_VERSION"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("width")
                .short('x')
                .long("width")
                .value_name("WIDTH")
                .help("Width of the captured frame (default 192)")
                .value_parser(value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new("height")
                .short('y')
                .long("height")
                .value_name("HEIGHT")
                .help("Height of the captured frame (default 108)")
                .value_parser(value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new("address")
                .short('a')
                .long("address")
                .value_name("ADDR")
                .help("IP address or hostname of the Hyperion server"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("Port of the Hyperion JSON server (default 19400)")
                .value_parser(value_parser!(u16)),
        )
        .arg(
            Arg::new("fps")
                .short('f')
                .long("fps")
                .value_name("FPS")
                .help("Frame rate cap, 0 for unlimited (default 15)")
                .value_parser(value_parser!(u32).range(0..=MAX_FPS as i64)),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON config file; command line values take precedence")
                .value_parser(value_parser!(PathBuf)),
        )
}

/// Parse `args` (including the program name) into a validated config.
pub fn config_from_args<I, T>(args: I) -> Result<GrabberConfig, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let mut cmd = command();
    let matches = cmd.try_get_matches_from_mut(args)?;

    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => GrabberConfig::from_file(path).map_err(|e| cmd.error(ErrorKind::Io, e))?,
        None => GrabberConfig::default(),
    };

    if let Some(&width) = matches.get_one::<u32>("width") {
        config.resolution.width = width;
    }
    if let Some(&height) = matches.get_one::<u32>("height") {
        config.resolution.height = height;
    }
    if let Some(address) = matches.get_one::<String>("address") {
        config.address = Some(address.clone());
    }
    if let Some(&port) = matches.get_one::<u16>("port") {
        config.port = port;
    }
    if let Some(&fps) = matches.get_one::<u32>("fps") {
        config.fps = fps;
    }

    config.validate().map_err(|e| match e {
        ConfigError::MissingAddress => cmd.error(
            ErrorKind::MissingRequiredArgument,
            "the Hyperion address is required (-a/--address)",
        ),
        other => cmd.error(ErrorKind::ValueValidation, other),
    })?;
    Ok(config)
}
