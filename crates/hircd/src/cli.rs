use std::path::PathBuf;

/// Command line arguments.
#[derive(Debug)]
pub(crate) struct Args {
    /// Path to the config file. When not specified `config::get_config_path` is used to find the
    /// config file.
    pub(crate) config_path: Option<PathBuf>,

    /// Path of the Unix socket to listen on. Overrides the config file and the built-in default.
    pub(crate) socket_path: Option<PathBuf>,
}

/// Parses command line arguments and handles `--version` and `--help`.
pub(crate) fn parse() -> Args {
    let mut config_path: Option<PathBuf> = None;
    let mut socket_path: Option<PathBuf> = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "-V" || arg == "--version" {
            print_version();
            std::process::exit(0);
        }

        if arg == "-h" || arg == "--help" {
            print_help();
            std::process::exit(0);
        }

        if arg == "-c" || arg == "--config" {
            match args.next() {
                Some(path) => {
                    config_path = Some(path.into());
                    continue;
                }
                None => {
                    eprintln!(
                        "Error: The argument '--config <FILE>' requires a file path but none was supplied"
                    );
                    eprintln!();
                    eprintln!("For more information try --help");
                    std::process::exit(1);
                }
            }
        }

        if arg == "-s" || arg == "--socket" {
            match args.next() {
                Some(path) => {
                    socket_path = Some(path.into());
                    continue;
                }
                None => {
                    eprintln!(
                        "Error: The argument '--socket <FILE>' requires a file path but none was supplied"
                    );
                    eprintln!();
                    eprintln!("For more information try --help");
                    std::process::exit(1);
                }
            }
        }

        eprintln!("Error: Found argument '{arg}' which wasn't expected");
        eprintln!();
        eprintln!("For more information try --help");
        std::process::exit(1);
    }

    Args {
        config_path,
        socket_path,
    }
}

fn print_version() {
    let crate_version = env!("CARGO_PKG_VERSION");
    println!("hircd {crate_version}");
}

fn print_help() {
    print_version();
    let crate_description = env!("CARGO_PKG_DESCRIPTION");
    println!(
        "\
{crate_description}

USAGE:
    hircd [OPTIONS]

OPTIONS:
    -c, --config <FILE>    Use this config file
    -s, --socket <FILE>    Listen on this Unix socket
    -h, --help             Print help information
    -V, --version          Print version information",
    )
}
