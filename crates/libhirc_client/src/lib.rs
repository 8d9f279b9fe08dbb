//! A minimal IRC client library for the hirc daemon: one `Client` per configured server, driving
//! a resolve → connect → register → pump loop on a local task and reporting what happens as a
//! stream of `Event`s. The daemon only ever calls `join`, `privmsg` and `quit`; everything else
//! (PASS/NICK/USER, identification, auto-join, PONGs, reconnects) happens internally.

mod session;
mod stream;
pub mod wire;

use session::Session;
use stream::{Stream, StreamError};
pub use stream::TlsError;

use libhirc_common::ChanName;

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

#[macro_use]
extern crate log;

/// `Client` tries to reconnect on error after this many seconds.
pub const RECONNECT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct ServerInfo {
    /// Server address
    pub addr: String,

    /// Server port
    pub port: u16,

    /// Use TLS?
    pub tls: bool,

    /// Server password, sent as PASS during registration and substituted into `ident_cmd`.
    pub pass: Option<String>,

    /// Nick (and user name) to register with.
    pub nick: String,

    /// Channels to automatically join after the welcome.
    pub auto_join: Vec<ChanName>,

    /// Raw IRC command template sent once after the 001 welcome, with `{}` replaced by `pass`.
    /// Server dependent; e.g. `PRIVMSG NickServ :IDENTIFY {}`.
    pub ident_cmd: Option<String>,
}

/// IRC session events. Returned by `Client` to the users via a channel.
///
/// The client only stops when its handle is dropped or after `quit`. On connection errors it
/// sends `Disconnected` and retries after `RECONNECT_SECS`, except when the host name cannot be
/// resolved at all (`CantResolveAddr`), which stops it.
#[derive(Debug)]
pub enum Event {
    /// Client resolving the host name
    ResolvingHost,
    /// Host name resolved, trying to connect to the given address
    Connecting(SocketAddr),
    /// TCP (or TLS) connection established and the registration exchange started
    Connected,
    /// Disconnected from the server; will retry after `RECONNECT_SECS`
    Disconnected,
    /// An IO error happened
    IoErr(std::io::Error),
    /// A TLS error happened
    TlsErr(TlsError),
    /// Remote end closed the connection
    ConnectionClosed,
    /// Host name did not resolve to any address; the client stops after this
    CantResolveAddr,
    /// The server accepted our nick (possibly an underscored variant of the configured one)
    NickChange { new_nick: String },
    /// A message from the server
    Msg(wire::Msg),
    /// A wire-protocol error
    WireError(String),
}

impl From<StreamError> for Event {
    fn from(err: StreamError) -> Event {
        match err {
            StreamError::TlsError(tls_err) => Event::TlsErr(tls_err),
            StreamError::IoError(io_err) => Event::IoErr(io_err),
        }
    }
}

/// Handle to one IRC session. Cheap to clone; all clones talk to the same connection task.
#[derive(Clone)]
pub struct Client {
    /// Channel to send commands to the connection task.
    msg_chan: mpsc::Sender<Cmd>,

    serv_name: String,

    /// Registration state, for `get_nick`.
    session: Session,
}

impl Client {
    /// Create a new client. Spawns the connection task on the current `LocalSet`.
    pub fn new(server_info: ServerInfo) -> (Client, mpsc::Receiver<Event>) {
        connect(server_info)
    }

    /// Name of the server this client is configured for.
    pub fn get_serv_name(&self) -> &str {
        &self.serv_name
    }

    /// The nick currently in use on this connection.
    pub fn get_nick(&self) -> String {
        self.session.get_nick()
    }

    /// Send a privmsg. Dropped silently while the connection is down; the caller has already
    /// recorded the message locally.
    pub fn privmsg(&self, target: &str, msg: &str) {
        let _ = self.msg_chan.try_send(Cmd::Msg(wire::privmsg(target, msg)));
    }

    /// Join the given list of channels.
    pub fn join(&self, chans: &[&ChanName]) {
        let _ = self
            .msg_chan
            .try_send(Cmd::Msg(wire::join(chans.iter().copied())));
    }

    /// Send a QUIT with an optional reason and stop the connection task.
    pub fn quit(&self, reason: Option<String>) {
        debug!("quit cmd received for {}", self.serv_name);
        let _ = self.msg_chan.try_send(Cmd::Quit(reason));
    }
}

//
// End of public API
//

#[derive(Debug)]
enum Cmd {
    /// Send this IRC message to the server. Needs to be a complete message including the trailing
    /// "\r\n".
    Msg(String),
    /// Send a QUIT (with optional reason), then stop the connection task.
    Quit(Option<String>),
}

fn connect(server_info: ServerInfo) -> (Client, mpsc::Receiver<Event>) {
    let serv_name = server_info.addr.clone();

    // Channel for returning events to the user.
    let (snd_ev, rcv_ev) = mpsc::channel::<Event>(100);

    // Channel for commands from the user.
    let (snd_cmd, rcv_cmd) = mpsc::channel::<Cmd>(100);

    let session = Session::new(server_info.clone());
    let session_clone = session.clone();

    tokio::task::spawn_local(main_loop(server_info, session_clone, snd_ev, rcv_cmd));

    (
        Client {
            msg_chan: snd_cmd,
            serv_name,
            session,
        },
        rcv_ev,
    )
}

async fn main_loop(
    server_info: ServerInfo,
    session: Session,
    snd_ev: mpsc::Sender<Event>,
    mut rcv_cmd: mpsc::Receiver<Cmd>,
) {
    let port = server_info.port;

    // Whether to wait before trying to (re)connect
    let mut wait = false;

    'connect: loop {
        if wait {
            match wait_(&mut rcv_cmd).await {
                WaitResult::Reconnect => {}
                WaitResult::Return => {
                    return;
                }
            }
        }

        //
        // Resolve the address
        //

        snd_ev.send(Event::ResolvingHost).await.unwrap();

        let serv_name = server_info.addr.clone();
        debug!("Resolving address of {}", serv_name);

        let serv_name_clone = serv_name.clone();
        let addrs = match tokio::task::spawn_blocking(move || {
            (serv_name_clone.as_str(), port).to_socket_addrs()
        })
        .await
        .expect("DNS task failed")
        {
            Err(io_err) => {
                debug!("resolve: {:?}", io_err);
                snd_ev.send(Event::IoErr(io_err)).await.unwrap();
                wait = true;
                continue;
            }
            Ok(addr_iter) => addr_iter.collect::<Vec<_>>(),
        };

        if addrs.is_empty() {
            snd_ev.send(Event::CantResolveAddr).await.unwrap();
            return;
        }

        debug!("Address resolved: {:?}", addrs);

        //
        // Establish the connection
        //

        let stream = match try_connect(addrs, &serv_name, server_info.tls, &snd_ev).await {
            Some(stream) => stream,
            None => {
                snd_ev.send(Event::Disconnected).await.unwrap();
                wait = true;
                continue;
            }
        };

        snd_ev.send(Event::Connected).await.unwrap();

        let (mut read_half, mut write_half) = tokio::io::split(stream);

        // Channel for the sender task. Messages are complete IRC messages (including the trailing
        // "\r\n") and the task sends them to the server as-is.
        let (snd_msg, mut rcv_msg) = mpsc::channel::<String>(100);

        session.reset();
        session.introduce(&snd_msg);

        // Spawn a task for outgoing messages.
        let snd_ev_clone = snd_ev.clone();
        tokio::task::spawn_local(async move {
            while let Some(msg) = rcv_msg.recv().await {
                if let Err(io_err) = write_half.write_all(msg.as_bytes()).await {
                    debug!("IO error when writing: {:?}", io_err);
                    let _ = snd_ev_clone.send(Event::IoErr(io_err)).await;
                    return;
                }
            }
        });

        //
        // Pump commands and server messages
        //

        let mut parse_buf: Vec<u8> = Vec::with_capacity(1024);
        let mut read_buf: [u8; 1024] = [0; 1024];

        loop {
            tokio::select! {
                cmd = rcv_cmd.recv() => {
                    match cmd {
                        None => {
                            // All client handles dropped; behave like a quit without a reason.
                            debug!("main loop: command channel closed");
                            let _ = snd_msg.try_send(wire::quit(None));
                            return;
                        }
                        Some(Cmd::Msg(irc_msg)) => {
                            let _ = snd_msg.try_send(irc_msg);
                        }
                        Some(Cmd::Quit(reason)) => {
                            let _ = snd_msg.try_send(wire::quit(reason));
                            // Dropping snd_msg ends the sender task after the QUIT goes out.
                            return;
                        }
                    }
                }
                bytes = read_half.read(&mut read_buf) => {
                    match bytes {
                        Err(io_err) => {
                            debug!("main loop: error when reading from socket: {:?}", io_err);
                            snd_ev.send(Event::IoErr(io_err)).await.unwrap();
                            snd_ev.send(Event::Disconnected).await.unwrap();
                            wait = true;
                            continue 'connect;
                        }
                        Ok(0) => {
                            debug!("main loop: read 0 bytes");
                            snd_ev.send(Event::ConnectionClosed).await.unwrap();
                            snd_ev.send(Event::Disconnected).await.unwrap();
                            wait = true;
                            continue 'connect;
                        }
                        Ok(bytes) => {
                            parse_buf.extend_from_slice(&read_buf[0..bytes]);
                            while let Some(msg) = wire::parse_irc_msg(&mut parse_buf) {
                                match msg {
                                    Err(err) => {
                                        snd_ev.send(Event::WireError(err)).await.unwrap();
                                    }
                                    Ok(msg) => {
                                        debug!("parsed msg: {:?}", msg);
                                        session.update(&msg, &snd_ev, &snd_msg);
                                        snd_ev.send(Event::Msg(msg)).await.unwrap();
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

enum WaitResult {
    Reconnect,
    Return,
}

async fn wait_(rcv_cmd: &mut mpsc::Receiver<Cmd>) -> WaitResult {
    let delay = tokio::time::sleep(Duration::from_secs(RECONNECT_SECS));
    tokio::pin!(delay);

    loop {
        tokio::select! {
            () = &mut delay => {
                return WaitResult::Reconnect;
            }
            cmd = rcv_cmd.recv() => {
                match cmd {
                    None | Some(Cmd::Quit(_)) => {
                        return WaitResult::Return;
                    }
                    Some(Cmd::Msg(_)) => {
                        // Dropped: there is no connection to send it on.
                        continue;
                    }
                }
            }
        }
    }
}

async fn try_connect(
    addrs: Vec<SocketAddr>,
    serv_name: &str,
    use_tls: bool,
    snd_ev: &mpsc::Sender<Event>,
) -> Option<Stream> {
    for addr in addrs {
        snd_ev.send(Event::Connecting(addr)).await.unwrap();
        let mb_stream = if use_tls {
            Stream::new_tls(addr, serv_name).await
        } else {
            Stream::new_tcp(addr).await
        };
        match mb_stream {
            Err(err) => {
                snd_ev.send(Event::from(err)).await.unwrap();
            }
            Ok(stream) => {
                return Some(stream);
            }
        }
    }

    None
}
