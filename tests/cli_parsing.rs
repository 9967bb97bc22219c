use clap::{CommandFactory, Parser};
use lokl::cli::{CaCommands, Cli, Commands, DnsCommands};
use std::path::PathBuf;

#[test]
fn test_cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn test_parse_start_defaults() {
    let cli = Cli::try_parse_from(["lokl", "start"]).unwrap();

    assert!(matches!(cli.command, Commands::Start { service: None }));
    assert!(!cli.json);
    assert!(cli.log_level.is_none());
    if std::env::var_os("LOKL_CONFIG").is_none() {
        assert_eq!(cli.config, PathBuf::from("lokl.yaml"));
    }
}

#[test]
fn test_parse_start_one_service() {
    let cli = Cli::try_parse_from(["lokl", "start", "api"]).unwrap();
    match cli.command {
        Commands::Start { service } => assert_eq!(service.as_deref(), Some("api")),
        _ => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_global_flags_after_subcommand() {
    let cli = Cli::try_parse_from([
        "lokl",
        "status",
        "--json",
        "--config",
        "/work/shop/lokl.yaml",
        "--log-level",
        "debug",
    ])
    .unwrap();

    assert!(matches!(cli.command, Commands::Status));
    assert!(cli.json);
    assert_eq!(cli.config, PathBuf::from("/work/shop/lokl.yaml"));
    assert_eq!(cli.log_level.as_deref(), Some("debug"));
}

#[test]
fn test_parse_stop_with_and_without_service() {
    let all = Cli::try_parse_from(["lokl", "stop"]).unwrap();
    assert!(matches!(all.command, Commands::Stop { service: None }));

    let one = Cli::try_parse_from(["lokl", "stop", "web"]).unwrap();
    match one.command {
        Commands::Stop { service } => assert_eq!(service.as_deref(), Some("web")),
        _ => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_restart_requires_service() {
    assert!(Cli::try_parse_from(["lokl", "restart"]).is_err());
    let cli = Cli::try_parse_from(["lokl", "restart", "api"]).unwrap();
    assert!(matches!(cli.command, Commands::Restart { service } if service == "api"));
}

#[test]
fn test_parse_logs_follow_and_lines() {
    let cli = Cli::try_parse_from(["lokl", "logs", "api", "-f", "-n", "50"]).unwrap();

    match cli.command {
        Commands::Logs {
            service,
            follow,
            lines,
        } => {
            assert_eq!(service, "api");
            assert!(follow);
            assert_eq!(lines, Some(50));
        }
        _ => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_parse_logs_defaults() {
    let cli = Cli::try_parse_from(["lokl", "logs", "api"]).unwrap();
    assert!(matches!(
        cli.command,
        Commands::Logs {
            follow: false,
            lines: None,
            ..
        }
    ));
}

#[test]
fn test_parse_dns_subcommands() {
    let cli = Cli::try_parse_from(["lokl", "dns", "setup"]).unwrap();
    match cli.command {
        Commands::Dns(DnsCommands::Setup { hosts_file }) => {
            assert_eq!(hosts_file, PathBuf::from("/etc/hosts"));
        }
        _ => panic!("Wrong dns command"),
    }

    let cli = Cli::try_parse_from(["lokl", "dns", "check", "--hosts-file", "/tmp/hosts"]).unwrap();
    assert!(matches!(
        cli.command,
        Commands::Dns(DnsCommands::Check { hosts_file }) if hosts_file == PathBuf::from("/tmp/hosts")
    ));

    assert!(Cli::try_parse_from(["lokl", "dns"]).is_err());
}

#[test]
fn test_parse_ca_subcommands() {
    let cli = Cli::try_parse_from(["lokl", "ca", "install", "--home", "/opt/lokl"]).unwrap();
    assert!(matches!(cli.command, Commands::Ca(CaCommands::Install)));
    assert_eq!(cli.home, Some(PathBuf::from("/opt/lokl")));

    let cli = Cli::try_parse_from(["lokl", "ca", "path"]).unwrap();
    assert!(matches!(cli.command, Commands::Ca(CaCommands::Path)));
}

#[test]
fn test_unknown_command_rejected() {
    assert!(Cli::try_parse_from(["lokl", "deploy"]).is_err());
}
