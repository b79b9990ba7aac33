//! Command-line entry point: argument parsing, logging setup, and the
//! translation from a parsed command into a call into [`commands`].

mod atmel;
mod commands;
mod dfu;
mod error;
mod hex;
mod stm32;
mod target;
mod usb_session;

use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use commands::{ConfigureProperty, GetField};
use error::Error;

/// `dfu-programmer <target> <command> [options]`.
#[derive(Parser, Debug)]
#[command(name = "dfu-programmer", version, about = "USB DFU firmware programmer")]
struct Cli {
    /// Target board name, e.g. `at89c51snd1c`, `at90usb1287`, `stm32`.
    target: String,

    #[command(subcommand)]
    command: Command,

    /// Suppress all output below `error`.
    #[arg(long, global = true)]
    quiet: bool,

    /// Verbosity, 0 (error) through 3 (trace). Overridden by `RUST_LOG`.
    #[arg(long, global = true)]
    debug: Option<u8>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Set a configuration/fuse byte (8051 targets only).
    Configure {
        property: ConfigurePropertyArg,
        value: String,
        #[arg(long)]
        suppress_validation: bool,
    },
    /// Read the entire addressable region and print it as Intel HEX.
    Dump {
        #[arg(long)]
        force: bool,
    },
    /// Erase flash.
    Erase {
        #[arg(long)]
        suppress_validation: bool,
        /// STM32 only: clear read protection (also mass-erases on real hardware).
        #[arg(long)]
        read_unprotect: bool,
    },
    /// Write an Intel HEX file (or stdin, named `STDIN`) to flash.
    Flash {
        file: String,
        #[arg(long)]
        suppress_validation: bool,
        #[arg(long)]
        force: bool,
    },
    /// Read one device-info field (Atmel targets only).
    Get { field: GetFieldArg },
    /// Jump to the resident application.
    Start,
    /// Print the package version and exit without touching USB.
    Version,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
#[value(rename_all = "UPPER")]
enum ConfigurePropertyArg {
    Bsb,
    Sbv,
    Ssb,
    Eb,
    Hsb,
}

impl From<ConfigurePropertyArg> for ConfigureProperty {
    fn from(value: ConfigurePropertyArg) -> Self {
        match value {
            ConfigurePropertyArg::Bsb => ConfigureProperty::Bsb,
            ConfigurePropertyArg::Sbv => ConfigureProperty::Sbv,
            ConfigurePropertyArg::Ssb => ConfigureProperty::Ssb,
            ConfigurePropertyArg::Eb => ConfigureProperty::Eb,
            ConfigurePropertyArg::Hsb => ConfigureProperty::Hsb,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum GetFieldArg {
    #[value(name = "bootloader-version")]
    BootloaderVersion,
    #[value(name = "ID1")]
    Id1,
    #[value(name = "ID2")]
    Id2,
    Bsb,
    Sbv,
    Ssb,
    Eb,
    Manufacturer,
    Family,
    #[value(name = "product-name")]
    ProductName,
    #[value(name = "product-revision")]
    ProductRevision,
    Hsb,
}

impl From<GetFieldArg> for GetField {
    fn from(value: GetFieldArg) -> Self {
        match value {
            GetFieldArg::BootloaderVersion => GetField::BootloaderVersion,
            GetFieldArg::Id1 => GetField::Id1,
            GetFieldArg::Id2 => GetField::Id2,
            GetFieldArg::Bsb => GetField::Bsb,
            GetFieldArg::Sbv => GetField::Sbv,
            GetFieldArg::Ssb => GetField::Ssb,
            GetFieldArg::Eb => GetField::Eb,
            GetFieldArg::Manufacturer => GetField::Manufacturer,
            GetFieldArg::Family => GetField::Family,
            GetFieldArg::ProductName => GetField::ProductName,
            GetFieldArg::ProductRevision => GetField::ProductRevision,
            GetFieldArg::Hsb => GetField::Hsb,
        }
    }
}

/// Parses a `configure` value as decimal or `0x`-prefixed hex.
fn parse_config_value(text: &str) -> Result<u16, Error> {
    let text = text.trim();
    let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16)
    } else {
        text.parse::<u16>()
    };
    parsed.map_err(|_| Error::Argument(format!("invalid configure value '{text}'")))
}

fn init_logging(quiet: bool, debug: Option<u8>) {
    let mut builder = env_logger::Builder::new();
    if std::env::var_os("RUST_LOG").is_some() {
        builder.parse_default_env();
    } else if quiet {
        builder.filter_level(log::LevelFilter::Error);
    } else {
        let level = match debug.unwrap_or(0) {
            0 => log::LevelFilter::Error,
            1 => log::LevelFilter::Warn,
            2 => log::LevelFilter::Info,
            _ => log::LevelFilter::Trace,
        };
        builder.filter_level(level);
    }
    builder.init();
}

fn run(cli: Cli) -> Result<(), Error> {
    if let Command::Version = cli.command {
        commands::execute_version();
        return Ok(());
    }

    let target = target::lookup(&cli.target)?;

    match cli.command {
        Command::Configure {
            property,
            value,
            suppress_validation,
        } => {
            let value = parse_config_value(&value)?;
            commands::execute_configure(target, property.into(), value, suppress_validation)
        }
        Command::Dump { force } => commands::execute_dump(target, force),
        Command::Erase {
            suppress_validation,
            read_unprotect,
        } => commands::execute_erase(target, suppress_validation, read_unprotect),
        Command::Flash {
            file,
            suppress_validation,
            force,
        } => commands::execute_flash(target, &file, suppress_validation, force),
        Command::Get { field } => commands::execute_get(target, field.into()),
        Command::Start => commands::execute_start_app(target),
        Command::Version => unreachable!("handled above"),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.debug);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("dfu-programmer: {err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_and_hex_config_values() {
        assert_eq!(parse_config_value("66").unwrap(), 66);
        assert_eq!(parse_config_value("0x42").unwrap(), 0x42);
        assert_eq!(parse_config_value("0X42").unwrap(), 0x42);
    }

    #[test]
    fn rejects_malformed_config_value() {
        assert!(parse_config_value("not-a-number").is_err());
    }
}
