mod cli;
mod config;
mod conn;
mod dispatch;
mod listener;
mod state;

#[cfg(test)]
mod tests;

use dispatch::{ClientLinks, Dispatcher};
use libhirc_client::{Client, ServerInfo};
use libhirc_common::ChanName;
use state::SharedState;

use std::path::PathBuf;
use std::process::exit;
use std::rc::Rc;
use std::time::Duration;

use tokio::sync::mpsc;

#[macro_use]
extern crate log;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("HIRCD_LOG", "info"))
        .init();

    let cli::Args {
        config_path,
        socket_path,
    } = cli::parse();

    let config_path = config_path.unwrap_or_else(config::get_config_path);
    if config_path.is_dir() {
        println!("The config path is a directory.");
        exit(1);
    } else if !config_path.is_file() {
        config::generate_default_config(&config_path);
        exit(1);
    }

    match config::parse_config(&config_path) {
        Err(err) => {
            println!("Can't parse config file:");
            println!("{}", err);
            exit(1);
        }
        Ok(config) => {
            let config_errors = config.validate();
            if !config_errors.is_empty() {
                println!(
                    "Config file error{}:",
                    if config_errors.len() > 1 { "s" } else { "" }
                );
                for error in config_errors {
                    println!("- {}", error);
                }
                exit(1);
            }

            let socket_path = socket_path
                .or_else(|| config.socket_path.clone())
                .unwrap_or_else(config::get_default_socket_path);
            run(config, socket_path)
        }
    }
}

fn run(config: config::Config, socket_path: PathBuf) {
    // One task per IRC session, two per local client, one for the listener, one for the
    // dispatcher; everything on one thread so the dispatcher's synchronous steps are atomic.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let local = tokio::task::LocalSet::new();

    let socket_path_cleanup = socket_path.clone();
    local.block_on(&runtime, async move {
        let listener = match listener::bind(&socket_path) {
            Err(err) => {
                println!("Can't bind {}: {}", socket_path.display(), err);
                exit(1);
            }
            Ok(listener) => listener,
        };
        info!("listening on {}", socket_path.display());

        // The two dispatcher inputs: requests from local clients, events from IRC connectors.
        let (snd_req, rcv_req) = mpsc::unbounded_channel();
        let (snd_conn, rcv_conn) = mpsc::unbounded_channel();

        let shared = SharedState::new(config.servers.iter().map(|(name, server)| {
            let chans = server
                .channels
                .iter()
                .map(|chan| ChanName::new(chan.clone()))
                .collect();
            (name.clone(), chans)
        }));

        let mut links = ClientLinks::new();
        for (name, server) in config.servers.iter() {
            let server_info = ServerInfo {
                addr: server.host.clone(),
                port: server.port,
                tls: server.security == config::Security::Tls,
                pass: server.pass.clone(),
                nick: server
                    .user
                    .clone()
                    .unwrap_or_else(|| config.default_user.clone()),
                auto_join: server
                    .channels
                    .iter()
                    .map(|chan| ChanName::new(chan.clone()))
                    .collect(),
                ident_cmd: server.ident_command.clone(),
            };

            let (client, rcv_conn_ev) = Client::new(server_info);
            tokio::task::spawn_local(conn::task(rcv_conn_ev, name.clone(), snd_conn.clone()));
            links.insert(name.clone(), client);
        }
        // The connector tasks hold the remaining senders.
        drop(snd_conn);

        let links = Rc::new(links);

        tokio::task::spawn_local(listener::task(listener, shared.clone(), snd_req));
        tokio::task::spawn_local(
            Dispatcher::new(shared.clone(), links.clone(), rcv_req, rcv_conn).run(),
        );

        wait_for_signal().await;

        info!("shutting down");
        links.quit_all();
        shared.close_all_clients();
        // Give the QUITs and the queue drains a moment before the runtime is torn down.
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let _ = std::fs::remove_file(&socket_path_cleanup);
}

async fn wait_for_signal() {
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).unwrap();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
