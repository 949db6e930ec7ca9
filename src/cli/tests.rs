use super::*;
use crate::cli::inspect::parse_arguments;

fn parse_args(argv: &[&str]) -> Args {
    Args::try_parse_from(argv)
        .unwrap_or_else(|err| panic!("argv={argv:?} should parse successfully: {err}"))
}

#[test]
fn serve_accepts_bind_and_global_flags() {
    let argv = [
        "mcp-relay",
        "serve",
        "--bind",
        "0.0.0.0:8080",
        "--config",
        "/tmp/relay.toml",
        "--log-format",
        "json",
    ];
    let args = parse_args(&argv);

    assert_eq!(args.config, Some(PathBuf::from("/tmp/relay.toml")));
    assert_eq!(args.log_format, LogFormat::Json);
    match args.command {
        Commands::Serve { bind } => assert_eq!(bind.as_deref(), Some("0.0.0.0:8080")),
        _ => panic!("expected serve subcommand for argv={argv:?}"),
    }
}

#[test]
fn log_format_defaults_to_text() {
    let args = parse_args(&["mcp-relay", "status"]);
    assert_eq!(args.log_format, LogFormat::Text);
    assert!(args.config.is_none());
}

#[test]
fn call_collects_arguments_identity_and_timeout() {
    let argv = [
        "mcp-relay",
        "call",
        "browser",
        "navigate",
        "--args",
        r#"{"url":"https://example.com"}"#,
        "-u",
        "alice",
        "--timeout",
        "5",
    ];
    match parse_args(&argv).command {
        Commands::Call {
            server,
            tool,
            args,
            identity,
            timeout,
        } => {
            assert_eq!(server, "browser");
            assert_eq!(tool, "navigate");
            assert_eq!(identity.as_deref(), Some("alice"));
            assert_eq!(timeout, Some(5));

            let arguments = parse_arguments(args.as_deref())
                .expect("arguments should parse")
                .expect("arguments present");
            assert_eq!(arguments["url"], "https://example.com");
        }
        _ => panic!("expected call subcommand for argv={argv:?}"),
    }
}

#[test]
fn token_subcommands_parse() {
    match parse_args(&["mcp-relay", "token", "set", "workspace", "secret"]).command {
        Commands::Token {
            command: TokenCommands::Set { server, token },
        } => {
            assert_eq!(server, "workspace");
            assert_eq!(token, "secret");
        }
        _ => panic!("expected token set subcommand"),
    }
    match parse_args(&["mcp-relay", "token", "remove", "workspace"]).command {
        Commands::Token {
            command: TokenCommands::Remove { server },
        } => assert_eq!(server, "workspace"),
        _ => panic!("expected token remove subcommand"),
    }
}

#[test]
fn subcommand_is_required() {
    assert!(Args::try_parse_from(["mcp-relay"]).is_err());
    assert!(Args::try_parse_from(["mcp-relay", "read", "browser"]).is_err());
}

#[test]
fn non_object_arguments_are_rejected() {
    assert!(parse_arguments(None).expect("no arguments").is_none());
    assert!(parse_arguments(Some("null")).expect("null").is_none());
    assert!(parse_arguments(Some("[1, 2]")).is_err());
    assert!(parse_arguments(Some("{not json")).is_err());
}
