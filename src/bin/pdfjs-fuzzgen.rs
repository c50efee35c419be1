//! pdfjs-fuzzgen command line
//!
//! Writes numbered JavaScript test cases generated from an API catalog.

use std::path::PathBuf;
use std::process;

use clap::{value_parser, Arg, ArgAction, Command};
use log::{error, info, LevelFilter};

use pdfjs_fuzzgen::{FuzzSession, GeneratorConfig, SessionConfig};

fn cli() -> Command {
    Command::new("pdfjs-fuzzgen")
        .about("Generate JavaScript API-call test cases for PDF reader scripting engines")
        .arg(
            Arg::new("base-dir")
                .short('p')
                .long("base-dir")
                .value_name("DIR")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("Root of the API catalog"),
        )
        .arg(
            Arg::new("config-dir")
                .short('c')
                .long("config-dir")
                .value_name("DIR")
                .default_value("config")
                .value_parser(value_parser!(PathBuf))
                .help("Directory with blocklist, limitlist and relation files"),
        )
        .arg(
            Arg::new("out")
                .short('o')
                .long("out")
                .value_name("DIR")
                .default_value("test")
                .value_parser(value_parser!(PathBuf))
                .help("Output directory for test cases"),
        )
        .arg(
            Arg::new("cases")
                .short('n')
                .long("cases")
                .value_name("N")
                .default_value("30000")
                .value_parser(value_parser!(usize))
                .help("Number of test cases to write"),
        )
        .arg(
            Arg::new("statements")
                .short('s')
                .long("statements")
                .value_name("N")
                .default_value("2048")
                .value_parser(value_parser!(usize))
                .help("API calls per test case"),
        )
        .arg(
            Arg::new("relation")
                .long("relation")
                .action(ArgAction::SetTrue)
                .help("Pair calls through the weak relation table"),
        )
        .arg(
            Arg::new("symbolic")
                .long("symbolic")
                .action(ArgAction::SetTrue)
                .help("Wire paired calls through symbolic constraints"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_name("SEED")
                .value_parser(value_parser!(u64))
                .help("Seed for reproducible output"),
        )
        .arg(
            Arg::new("basic-ratio")
                .long("basic-ratio")
                .value_name("P")
                .default_value("0.2")
                .value_parser(value_parser!(f64))
                .help("Chance a test case uses the basic engine"),
        )
        .arg(
            Arg::new("sweep")
                .long("sweep")
                .action(ArgAction::SetTrue)
                .help("Write exhaustive per-API sweeps instead of random test cases"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable debug logging"),
        )
}

fn main() {
    let matches = cli().get_matches();

    let level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::builder()
        .filter_level(level)
        .parse_default_env()
        .init();

    let mut generator = GeneratorConfig::default();
    generator.seed = matches.get_one::<u64>("seed").copied();

    // Arguments with defaults are always present.
    let path = |name: &str| matches.get_one::<PathBuf>(name).cloned().unwrap_or_default();
    let count = |name: &str| matches.get_one::<usize>(name).copied().unwrap_or_default();

    let config = SessionConfig {
        base_dir: path("base-dir"),
        config_dir: path("config-dir"),
        out_dir: path("out"),
        cases: count("cases"),
        statements: count("statements"),
        weak_relation: matches.get_flag("relation"),
        symbolic_relation: matches.get_flag("symbolic"),
        basic_ratio: matches.get_one::<f64>("basic-ratio").copied().unwrap_or(0.2),
        generator,
    };

    let mut session = match FuzzSession::load(config) {
        Ok(session) => session,
        Err(e) => {
            error!("failed to load catalog: {}", e);
            process::exit(1);
        }
    };

    if matches.get_flag("sweep") {
        match session.sweep() {
            Ok(paths) => {
                for path in paths {
                    info!("wrote {}", path.display());
                }
            }
            Err(e) => {
                error!("sweep failed: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    match session.run() {
        Ok(summary) => {
            match serde_json::to_string_pretty(&summary) {
                Ok(json) => println!("{}", json),
                Err(e) => error!("cannot serialize summary: {}", e),
            }
            if summary.written == 0 && summary.failed > 0 {
                process::exit(1);
            }
        }
        Err(e) => {
            error!("generation failed: {}", e);
            process::exit(1);
        }
    }
}
