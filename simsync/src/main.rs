use std::path::PathBuf;
use std::process::ExitCode;

use clap::{arg, command, crate_name, value_parser, Arg, ArgAction, ArgMatches, Command};
use cli::client::Settings;
use client::api::{API_URL_ENV, DEFAULT_API_URL};
use client::checkout::{DEFAULT_ORIGIN, ORIGIN_ENV};
use client::ClientError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

const DEFAULT_LOG_FILTER: &str = "simsync=info,client=info,server=info";

fn id_arg(help: &'static str) -> Arg {
    arg!(<ID>).required(true).help(help)
}

fn offset_arg() -> Arg {
    arg!(--offset <OFFSET>)
        .value_parser(value_parser!(u32))
        .default_value("0")
        .help("Entries of the community listing to skip")
}

fn files_arg() -> Arg {
    Arg::new("files")
        .value_name("FILE")
        .required(true)
        .num_args(1..)
        .value_parser(value_parser!(PathBuf))
        .help("Files to back up")
}

fn build_cli() -> Command {
    command!(crate_name!())
        .version(clap::crate_version!())
        .about(clap::crate_description!())
        .arg(
            arg!(-u --uri <URI>)
                .env(API_URL_ENV)
                .default_value(DEFAULT_API_URL)
                .global(true)
                .help("SimSync API URI"),
        )
        .arg(
            arg!(--"identity-uri" <URI>)
                .env("SIMSYNC_IDENTITY_URL")
                .global(true)
                .help("Identity provider URI, the API URI when omitted"),
        )
        .arg(
            arg!(-e --email <EMAIL>)
                .env("SIMSYNC_EMAIL")
                .global(true)
                .help("Account email"),
        )
        .arg(
            arg!(-p --password <PASSWORD>)
                .env("SIMSYNC_PASSWORD")
                .hide_env_values(true)
                .global(true)
                .help("Account password"),
        )
        .arg(
            arg!(--origin <ORIGIN>)
                .env(ORIGIN_ENV)
                .default_value(DEFAULT_ORIGIN)
                .global(true)
                .help("Front end origin the checkout returns to"),
        )
        .arg(
            arg!(--"download-dir" <DIR>)
                .env("SIMSYNC_DOWNLOAD_DIR")
                .default_value(".")
                .value_parser(value_parser!(PathBuf))
                .global(true)
                .help("Where downloads are saved when no browser can be opened"),
        )
        .arg(
            arg!(-y --yes)
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Answer yes to every confirmation"),
        )
        .arg(
            arg!(--"no-browser")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Never open a browser, save downloads locally instead"),
        )
        .subcommand(Command::new(cli::VERSION_SUBCOMMAND).about(cli::VERSION_DESCRIPTION))
        .subcommand(Command::new(cli::BUGREPORT_SUBCOMMAND).about(cli::BUGREPORT_DESCRIPTION))
        .subcommand(
            Command::new(cli::SERVER_SUBCOMMAND)
                .about(cli::SERVER_DESCRIPTION)
                .arg(
                    arg!(--port <PORT>)
                        .value_parser(value_parser!(u16))
                        .help("Port to listen on, SIMSYNC_PORT or 8000 when omitted"),
                ),
        )
        .subcommand(Command::new(cli::SIGNUP_SUBCOMMAND).about(cli::SIGNUP_DESCRIPTION))
        .subcommand(Command::new(cli::WHOAMI_SUBCOMMAND).about(cli::WHOAMI_DESCRIPTION))
        .subcommand(Command::new(cli::LIST_SUBCOMMAND).about(cli::LIST_DESCRIPTION))
        .subcommand(
            Command::new(cli::UPLOAD_SUBCOMMAND)
                .about(cli::UPLOAD_DESCRIPTION)
                .arg(files_arg()),
        )
        .subcommand(
            Command::new(cli::DROP_SUBCOMMAND)
                .about(cli::DROP_DESCRIPTION)
                .arg(files_arg()),
        )
        .subcommand(
            Command::new(cli::DOWNLOAD_SUBCOMMAND)
                .about(cli::DOWNLOAD_DESCRIPTION)
                .arg(id_arg("File id")),
        )
        .subcommand(
            Command::new(cli::DELETE_SUBCOMMAND)
                .about(cli::DELETE_DESCRIPTION)
                .arg(id_arg("File id")),
        )
        .subcommand(Command::new(cli::UPGRADE_SUBCOMMAND).about(cli::UPGRADE_DESCRIPTION))
        .subcommand(
            Command::new(cli::ROUTE_SUBCOMMAND)
                .about(cli::ROUTE_DESCRIPTION)
                .arg(arg!(<PATH>).required(true).help("Path such as /dashboard")),
        )
        .subcommand(
            Command::new(cli::COMMUNITY_SUBCOMMAND)
                .about(cli::COMMUNITY_DESCRIPTION)
                .arg_required_else_help(true)
                .subcommand(
                    Command::new(cli::LIST_SUBCOMMAND)
                        .about("List shared files, newest first")
                        .arg(offset_arg()),
                )
                .subcommand(
                    Command::new(cli::SHARE_SUBCOMMAND)
                        .about(cli::SHARE_DESCRIPTION)
                        .arg(id_arg("Id of your file"))
                        .arg(
                            arg!(-d --description <TEXT>)
                                .default_value("")
                                .help("What the file is"),
                        ),
                )
                .subcommand(
                    Command::new(cli::DOWNLOAD_SUBCOMMAND)
                        .about("Download a community file")
                        .arg(id_arg("Shared file id"))
                        .arg(offset_arg()),
                )
                .subcommand(
                    Command::new(cli::RATE_SUBCOMMAND)
                        .about(cli::RATE_DESCRIPTION)
                        .arg(id_arg("Shared file id"))
                        .arg(
                            arg!(<STARS>)
                                .required(true)
                                .value_parser(value_parser!(u8))
                                .help("Stars, 1 to 5"),
                        ),
                )
                .subcommand(
                    Command::new(cli::UNSHARE_SUBCOMMAND)
                        .about(cli::UNSHARE_DESCRIPTION)
                        .arg(id_arg("Shared file id")),
                ),
        )
        .arg_required_else_help(true)
        .disable_version_flag(true)
}

fn settings(matches: &ArgMatches) -> Settings {
    let uri = matches
        .get_one::<String>("uri")
        .cloned()
        .unwrap_or_else(|| DEFAULT_API_URL.to_owned());
    Settings {
        identity_uri: matches
            .get_one::<String>("identity-uri")
            .cloned()
            .unwrap_or_else(|| uri.clone()),
        uri,
        email: matches.get_one::<String>("email").cloned(),
        password: matches.get_one::<String>("password").cloned(),
        origin: matches
            .get_one::<String>("origin")
            .cloned()
            .unwrap_or_else(|| DEFAULT_ORIGIN.to_owned()),
        download_dir: matches
            .get_one::<PathBuf>("download-dir")
            .cloned()
            .unwrap_or_else(|| PathBuf::from(".")),
        assume_yes: matches.get_flag("yes"),
        browser: !matches.get_flag("no-browser"),
    }
}

fn id(matches: &ArgMatches) -> &str {
    matches.get_one::<String>("ID").map_or("", String::as_str)
}

fn offset(matches: &ArgMatches) -> u32 {
    matches.get_one::<u32>("offset").copied().unwrap_or_default()
}

fn files(matches: &ArgMatches) -> Vec<PathBuf> {
    matches
        .get_many::<PathBuf>("files")
        .map(|v| v.cloned().collect())
        .unwrap_or_default()
}

async fn run_community(settings: &Settings, matches: &ArgMatches) -> Result<(), ClientError> {
    match matches.subcommand() {
        Some((cli::LIST_SUBCOMMAND, m)) => cli::client::community_list(settings, offset(m)).await,
        Some((cli::SHARE_SUBCOMMAND, m)) => {
            let description = m.get_one::<String>("description").map_or("", String::as_str);
            cli::client::community_share(settings, id(m), description).await
        }
        Some((cli::DOWNLOAD_SUBCOMMAND, m)) => {
            cli::client::community_download(settings, id(m), offset(m)).await
        }
        Some((cli::RATE_SUBCOMMAND, m)) => {
            let stars = m.get_one::<u8>("STARS").copied().unwrap_or_default();
            cli::client::community_rate(settings, id(m), stars).await
        }
        Some((cli::UNSHARE_SUBCOMMAND, m)) => cli::client::community_unshare(settings, id(m)).await,
        _ => Ok(()),
    }
}

async fn run_client(cli: &ArgMatches) -> Result<(), ClientError> {
    let Some((name, matches)) = cli.subcommand() else {
        return Ok(());
    };
    let settings = settings(matches);
    match name {
        cli::SIGNUP_SUBCOMMAND => cli::client::sign_up(&settings).await,
        cli::WHOAMI_SUBCOMMAND => cli::client::whoami(&settings).await,
        cli::LIST_SUBCOMMAND => cli::client::list(&settings).await,
        cli::UPLOAD_SUBCOMMAND => cli::client::upload(&settings, &files(matches), false).await,
        cli::DROP_SUBCOMMAND => cli::client::upload(&settings, &files(matches), true).await,
        cli::DOWNLOAD_SUBCOMMAND => cli::client::download(&settings, id(matches)).await,
        cli::DELETE_SUBCOMMAND => cli::client::delete(&settings, id(matches)).await,
        cli::UPGRADE_SUBCOMMAND => cli::client::upgrade(&settings).await,
        cli::ROUTE_SUBCOMMAND => {
            let path = matches.get_one::<String>("PATH").map_or("/", String::as_str);
            cli::client::route(&settings, path).await
        }
        cli::COMMUNITY_SUBCOMMAND => run_community(&settings, matches).await,
        _ => Ok(()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = build_cli().get_matches();

    if cli.subcommand_matches(cli::VERSION_SUBCOMMAND).is_some() {
        cli::version::run();
    } else if cli.subcommand_matches(cli::BUGREPORT_SUBCOMMAND).is_some() {
        cli::bugreport::run();
    } else if let Some(server_matches) = cli.subcommand_matches(cli::SERVER_SUBCOMMAND) {
        if let Err(e) = cli::server::run(server_matches).await {
            tracing::error!("server stopped: {e}");
            return ExitCode::FAILURE;
        }
    } else if let Err(e) = run_client(&cli).await {
        tracing::error!("{e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
