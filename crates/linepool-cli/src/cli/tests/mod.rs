//! CLI parse tests.

use super::{Cli, CliCommand};
use clap::Parser;

pub(super) fn parse(args: &[&str]) -> CliCommand {
    let cli = Cli::try_parse_from(args).unwrap();
    cli.command
}

#[test]
fn cli_parse_send_defaults() {
    match parse(&["linepool", "send", "SET a 1"]) {
        CliCommand::Send {
            lines,
            retry,
            address,
        } => {
            assert_eq!(lines, vec!["SET a 1"]);
            assert!(!retry);
            assert!(address.is_none());
        }
        _ => panic!("expected Send"),
    }
}

#[test]
fn cli_parse_send_with_flags() {
    match parse(&[
        "linepool",
        "send",
        "--retry",
        "--address",
        "10.0.0.5:11211",
        "SET a 1",
        "GET a",
    ]) {
        CliCommand::Send {
            lines,
            retry,
            address,
        } => {
            assert_eq!(lines, vec!["SET a 1", "GET a"]);
            assert!(retry);
            assert_eq!(address.as_deref(), Some("10.0.0.5:11211"));
        }
        _ => panic!("expected Send"),
    }
}

#[test]
fn cli_parse_send_requires_a_line() {
    assert!(Cli::try_parse_from(["linepool", "send"]).is_err());
}

#[test]
fn cli_parse_config() {
    match parse(&["linepool", "config"]) {
        CliCommand::Config => {}
        _ => panic!("expected Config"),
    }
}
