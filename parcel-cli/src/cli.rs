//! Command-line definition

use anyhow::{anyhow, bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use parcel_client::ClientConfig;
use std::path::PathBuf;

pub fn build_cli() -> Command {
    Command::new("parcel")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Checksum-verified multipart uploads")
        .subcommand_required(true)
        .arg(
            Arg::new("endpoint")
                .long("endpoint")
                .value_name("URL")
                .global(true)
                .help("Service endpoint, e.g. http://127.0.0.1:9000"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("JSON client configuration file"),
        )
        .arg(
            Arg::new("no-crc")
                .long("no-crc")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Skip CRC-64 verification of uploaded parts"),
        )
        .arg(
            Arg::new("max-attempts")
                .long("max-attempts")
                .value_name("N")
                .global(true)
                .value_parser(value_parser!(u32).range(1..))
                .help("Attempts per request, first one included"),
        )
        .subcommand(
            Command::new("create")
                .about("Start a multipart upload")
                .arg(bucket_arg())
                .arg(key_arg()),
        )
        .subcommand(
            Command::new("upload-part")
                .about("Upload one part from a file or from stdin")
                .args(session_args())
                .arg(
                    Arg::new("part-number")
                        .long("part-number")
                        .short('n')
                        .required(true)
                        .value_parser(value_parser!(u32).range(1..)),
                )
                .arg(
                    Arg::new("file")
                        .long("file")
                        .value_name("PATH")
                        .value_parser(value_parser!(PathBuf))
                        .conflicts_with("stdin")
                        .required_unless_present("stdin"),
                )
                .arg(
                    Arg::new("stdin")
                        .long("stdin")
                        .action(ArgAction::SetTrue)
                        .requires("size")
                        .help("Read the part from stdin; it cannot be retried once sent"),
                )
                .arg(
                    Arg::new("offset")
                        .long("offset")
                        .value_parser(value_parser!(u64))
                        .default_value("0")
                        .conflicts_with("stdin"),
                )
                .arg(
                    Arg::new("size")
                        .long("size")
                        .value_parser(value_parser!(u64))
                        .help("Part size in bytes; defaults to the rest of the file"),
                ),
        )
        .subcommand(
            Command::new("complete")
                .about("Assemble uploaded parts into the object")
                .args(session_args())
                .arg(
                    Arg::new("parts")
                        .long("parts")
                        .value_name("PATH")
                        .value_parser(value_parser!(PathBuf))
                        .conflicts_with("all")
                        .required_unless_present("all")
                        .help("JSON array of {\"part_number\", \"etag\"} objects"),
                )
                .arg(
                    Arg::new("all")
                        .long("all")
                        .action(ArgAction::SetTrue)
                        .help("Let the server assemble every part it holds"),
                ),
        )
        .subcommand(
            Command::new("abort")
                .about("Abandon a multipart upload")
                .args(session_args()),
        )
        .subcommand(
            Command::new("list-parts")
                .about("List uploaded parts")
                .args(session_args())
                .arg(
                    Arg::new("max-parts")
                        .long("max-parts")
                        .value_parser(value_parser!(u32)),
                )
                .arg(
                    Arg::new("marker")
                        .long("marker")
                        .value_parser(value_parser!(u32))
                        .conflicts_with("all"),
                )
                .arg(
                    Arg::new("all")
                        .long("all")
                        .action(ArgAction::SetTrue)
                        .help("Follow pagination to the last part"),
                ),
        )
        .subcommand(
            Command::new("list-uploads")
                .about("List uploads neither completed nor aborted")
                .arg(bucket_arg())
                .arg(Arg::new("prefix").long("prefix"))
                .arg(Arg::new("delimiter").long("delimiter"))
                .arg(
                    Arg::new("max-uploads")
                        .long("max-uploads")
                        .value_parser(value_parser!(u32)),
                )
                .arg(
                    Arg::new("all")
                        .long("all")
                        .action(ArgAction::SetTrue)
                        .help("Follow pagination to the last upload"),
                ),
        )
}

fn bucket_arg() -> Arg {
    Arg::new("bucket").long("bucket").short('b').required(true)
}

fn key_arg() -> Arg {
    Arg::new("key").long("key").short('k').required(true)
}

fn session_args() -> [Arg; 3] {
    [
        bucket_arg(),
        key_arg(),
        Arg::new("upload-id").long("upload-id").short('u').required(true),
    ]
}

/// Client configuration from `--config`, then `--endpoint` and the flag overrides
pub fn client_config(matches: &ArgMatches) -> Result<ClientConfig> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => ClientConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => ClientConfig::default(),
    };

    if let Some(endpoint) = matches.get_one::<String>("endpoint") {
        config.endpoint = endpoint.clone();
    }
    if config.endpoint.is_empty() {
        bail!("no endpoint given; pass --endpoint or set it in --config");
    }
    if matches.get_flag("no-crc") {
        config.enable_crc = false;
    }
    if let Some(attempts) = matches.get_one::<u32>("max-attempts") {
        config.retry = config.retry.with_max_attempts(*attempts);
    }

    config
        .validate()
        .map_err(|e| anyhow!("invalid configuration: {}", e))?;
    Ok(config)
}

/// Required string argument of a subcommand
pub fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a str> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing --{}", name))
}
