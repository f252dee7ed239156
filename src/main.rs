use std::fs::{
    create_dir_all,
    read,
};
use std::net::SocketAddr;
use std::path::Path;
use std::process::exit;
use std::sync::Arc;
use std::thread;

use tiny_http::{
    Server,
    ServerConfig,
    SslConfig,
};

use log::{info, error};

use hashput::ingest::Ingester;
use hashput::request::handle;

mod arg;
use arg::Settings;


fn ssl_config(p: &Path) -> Option<SslConfig> {
    match read(p) {
        Ok(v) => {
            // key and certificate share the same PEM file
            Some(SslConfig {
                certificate: v.clone(),
                private_key: v,
            })
        },
        Err(e) => {
            error!("cannot read ssl key and certificate {:?}: {}", p, e);
            None
        },
    }
}

fn main() {
    let settings = Settings::from_args();

    env_logger::Builder::new()
        .filter_level(settings.log_level)
        .parse_default_env()
        .init();

    if let Err(e) = create_dir_all(&settings.path) {
        error!("cannot create storage path {:?}: {}", &settings.path, e);
        exit(1);
    }
    let base_path = match settings.path.canonicalize() {
        Ok(v) => v,
        Err(e) => {
            error!("cannot resolve storage path {:?}: {}", &settings.path, e);
            exit(1);
        },
    };

    let sock_addr = match format!("{}:{}", settings.host, settings.port).parse::<SocketAddr>() {
        Ok(v) => v,
        Err(e) => {
            error!("invalid bind address {}:{}: {}", settings.host, settings.port, e);
            exit(1);
        },
    };
    let ssl = match &settings.ssl_cert {
        Some(p) => {
            match ssl_config(p) {
                Some(v) => Some(v),
                None => exit(1),
            }
        },
        None => None,
    };
    let is_ssl = ssl.is_some();
    let srv_cfg = ServerConfig{
        addr: sock_addr,
        ssl,
    };
    let srv = match Server::new(srv_cfg) {
        Ok(v) => v,
        Err(e) => {
            error!("cannot start server on {}: {}", sock_addr, e);
            exit(1);
        },
    };

    let ingester = Ingester::new(base_path).with_algorithm(settings.digest);
    info!("storing {} named uploads in {:?}", ingester.algorithm(), ingester.root());
    info!("listening on {}://{}", if is_ssl { "https" } else { "http" }, sock_addr);
    let ingester = Arc::new(ingester);

    loop {
        let req = match srv.recv() {
            Ok(v) => v,
            Err(e) => {
                error!("{}", e);
                break;
            },
        };
        let ingester = ingester.clone();
        thread::spawn(move || {
            handle(req, &ingester);
        });
    }
}
