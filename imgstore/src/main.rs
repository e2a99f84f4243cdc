use std::process::ExitCode;

use clap::{Arg, ArgMatches, Command, arg, command, crate_name, value_parser};
use client::{ListParams, UploadParams};

mod cli;

const DEFAULT_URI: &str = "http://localhost:3000";

fn uri_arg() -> Arg {
    arg!(-u --uri <URI>)
        .default_value(DEFAULT_URI)
        .help("Image server URI")
}

fn build_cli() -> Command {
    command!(crate_name!())
        .version(clap::crate_version!())
        .about(clap::crate_description!())
        .subcommand(Command::new(cli::VERSION_SUBCOMMAND).about(cli::VERSION_DESCRIPTION))
        .subcommand(Command::new(cli::BUGREPORT_SUBCOMMAND).about(cli::BUGREPORT_DESCRIPTION))
        .subcommand(Command::new(cli::SERVER_SUBCOMMAND).about(cli::SERVER_DESCRIPTION))
        .subcommand(
            Command::new(cli::UPLOAD_SUBCOMMAND)
                .about(cli::UPLOAD_DESCRIPTION)
                .arg(uri_arg())
                .arg(
                    arg!(-f --file <FILE>)
                        .required(true)
                        .help("Path to the image to upload"),
                )
                .arg(arg!(--folder <FOLDER>).help("Folder to store the image in")),
        )
        .subcommand(
            Command::new(cli::LIST_SUBCOMMAND)
                .about(cli::LIST_DESCRIPTION)
                .arg(uri_arg())
                .arg(arg!(--folder <FOLDER>).help("Only list this folder"))
                .arg(
                    arg!(-p --page <PAGE>)
                        .value_parser(value_parser!(u32).range(1..))
                        .help("Page number starting from 1"),
                )
                .arg(
                    arg!(-l --limit <LIMIT>)
                        .value_parser(value_parser!(u32).range(1..=100))
                        .help("Images per page"),
                )
                .arg(
                    arg!(-s --sort <SORT>)
                        .value_parser(["date", "size", "name"])
                        .help("Sort order"),
                ),
        )
        .subcommand(
            Command::new(cli::STATS_SUBCOMMAND)
                .about(cli::STATS_DESCRIPTION)
                .arg(uri_arg()),
        )
        .subcommand(
            Command::new(cli::DELETE_SUBCOMMAND)
                .about(cli::DELETE_DESCRIPTION)
                .arg(uri_arg())
                .arg(
                    arg!(<PATH>)
                        .required(true)
                        .help("Path of the original relative to the upload root"),
                ),
        )
        .arg_required_else_help(true)
        .disable_version_flag(true)
}

fn string_arg(matches: &ArgMatches, id: &str) -> Option<String> {
    matches.get_one::<String>(id).cloned()
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = build_cli().get_matches();

    match cli.subcommand() {
        Some((cli::VERSION_SUBCOMMAND, _)) => cli::version::run(),
        Some((cli::BUGREPORT_SUBCOMMAND, _)) => cli::bugreport::run(),
        Some((cli::SERVER_SUBCOMMAND, _)) => return cli::server::run().await,
        Some((cli::UPLOAD_SUBCOMMAND, matches)) => {
            let params = UploadParams {
                uri: string_arg(matches, "uri").unwrap_or_else(|| DEFAULT_URI.to_owned()),
                file: string_arg(matches, "file").unwrap_or_default(),
                folder: string_arg(matches, "folder"),
            };
            cli::client::upload(params).await;
        }
        Some((cli::LIST_SUBCOMMAND, matches)) => {
            let params = ListParams {
                uri: string_arg(matches, "uri").unwrap_or_else(|| DEFAULT_URI.to_owned()),
                folder: string_arg(matches, "folder"),
                page: matches.get_one::<u32>("page").copied(),
                limit: matches.get_one::<u32>("limit").copied(),
                sort: string_arg(matches, "sort"),
            };
            cli::client::list(params).await;
        }
        Some((cli::STATS_SUBCOMMAND, matches)) => {
            let uri = string_arg(matches, "uri").unwrap_or_else(|| DEFAULT_URI.to_owned());
            cli::client::stats(&uri).await;
        }
        Some((cli::DELETE_SUBCOMMAND, matches)) => {
            let uri = string_arg(matches, "uri").unwrap_or_else(|| DEFAULT_URI.to_owned());
            let path = string_arg(matches, "PATH").unwrap_or_default();
            cli::client::delete(&uri, &path).await;
        }
        _ => {}
    }
    ExitCode::SUCCESS
}
