use std::path::PathBuf;
use std::str::FromStr;

use clap::{
    App,
    Arg,
    ArgMatches,
    value_t,
};
use log::LevelFilter;

use hashput::digest::DigestAlgorithm;

pub struct Settings {
    pub host: String,
    pub port: u16,
    pub path: PathBuf,
    pub ssl_cert: Option<PathBuf>,
    pub log_level: LevelFilter,
    pub digest: DigestAlgorithm,
}

const BIND_HOST: &str  = "127.0.0.1";
const BIND_PORT: u16 = 8080;
const STORAGE_PATH: &str = ".";

impl Settings {

    pub fn new() -> Settings {
        Settings {
            host: BIND_HOST.to_string(),
            port: BIND_PORT,
            path: PathBuf::from(STORAGE_PATH),
            ssl_cert: None,
            log_level: LevelFilter::Debug,
            digest: DigestAlgorithm::default(),
        }
    }

    fn bind_from_args(&mut self, arg: &ArgMatches) {
        if let Some(v) = arg.value_of("host") {
            self.host = v.to_string();
        }

        if arg.is_present("port") {
            self.port = value_t!(arg, "port", u16).unwrap_or_else(|e| e.exit());
        }
    }

    fn storage_from_args(&mut self, arg: &ArgMatches) {
        if let Some(v) = arg.value_of("path") {
            self.path = PathBuf::from(v);
        }

        if let Some(v) = arg.value_of("digest") {
            // possible_values already restricts the input
            if let Ok(algorithm) = DigestAlgorithm::from_str(v) {
                self.digest = algorithm;
            }
        }
    }

    fn misc_from_args(&mut self, arg: &ArgMatches) {
        if let Some(v) = arg.value_of("ssl_cert") {
            self.ssl_cert = Some(PathBuf::from(v));
        }

        if let Some(v) = arg.value_of("log_level") {
            self.log_level = LevelFilter::from_str(v).unwrap_or(LevelFilter::Debug);
        }
    }

    pub fn from_args() -> Settings {
        let mut o = App::new("hashput");
        o = o.version(env!("CARGO_PKG_VERSION"));
        o = o.about("Streams uploads to disk and publishes them under their content digest");
        o = o.arg(
            Arg::with_name("path")
                .long("path")
                .value_name("DIR")
                .help("Path to storage area")
                .takes_value(true)
                );
        o = o.arg(
            Arg::with_name("host")
                .long("host")
                .value_name("HOST")
                .help("IP address to bind to")
                .takes_value(true)
                );
        o = o.arg(
            Arg::with_name("port")
                .long("port")
                .short("p")
                .value_name("PORT")
                .help("TCP port to listen on")
                .takes_value(true)
                );
        o = o.arg(
            Arg::with_name("ssl_cert")
                .long("ssl-cert")
                .value_name("PEM")
                .help("Path to SSL key and certificate file; enables SSL")
                .takes_value(true)
                );
        o = o.arg(
            Arg::with_name("log_level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level [debug]")
                .possible_values(&["off", "error", "warn", "info", "debug", "trace"])
                .case_insensitive(true)
                .takes_value(true)
                );
        o = o.arg(
            Arg::with_name("digest")
                .long("digest")
                .value_name("ALGORITHM")
                .help("Digest used to name published files [sha1]")
                .possible_values(&["sha1", "sha256"])
                .takes_value(true)
                );

        let arg_matches = o.get_matches();
        let mut settings = Settings::new();
        settings.bind_from_args(&arg_matches);
        settings.storage_from_args(&arg_matches);
        settings.misc_from_args(&arg_matches);
        settings
    }
}
