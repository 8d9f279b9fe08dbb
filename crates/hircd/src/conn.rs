//! IRC event handling: translates `libhirc_client` events into `ConnEv` items on the IRC inbound
//! queue. Everything the dispatcher doesn't care about is discarded here.

use crate::dispatch::ConnEv;

use libhirc_client::wire;
use libhirc_common::{ChanName, MsgBody};

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

pub(crate) async fn task(
    rcv_ev: mpsc::Receiver<libhirc_client::Event>,
    serv: String,
    snd_conn: mpsc::UnboundedSender<ConnEv>,
) {
    let mut rcv_ev = ReceiverStream::new(rcv_ev);
    while let Some(ev) = rcv_ev.next().await {
        handle_conn_ev(&serv, &snd_conn, ev);
    }
    // Event stream over: the session stopped for good.
    let _ = snd_conn.send(ConnEv::Down { serv });
}

fn handle_conn_ev(serv: &str, snd_conn: &mpsc::UnboundedSender<ConnEv>, ev: libhirc_client::Event) {
    use libhirc_client::Event::*;
    match ev {
        ResolvingHost => {
            debug!("{}: resolving host", serv);
        }
        Connecting(sock_addr) => {
            debug!("{}: connecting to {}", serv, sock_addr);
        }
        Connected => {
            let _ = snd_conn.send(ConnEv::Up {
                serv: serv.to_owned(),
            });
        }
        Disconnected => {
            let _ = snd_conn.send(ConnEv::Down {
                serv: serv.to_owned(),
            });
        }
        IoErr(err) => {
            warn!("{}: connection error: {}", serv, err);
        }
        TlsErr(err) => {
            warn!("{}: TLS error: {}", serv, err);
        }
        ConnectionClosed => {
            warn!("{}: connection closed on the remote end", serv);
        }
        CantResolveAddr => {
            error!("{}: can't resolve address, giving up on this server", serv);
        }
        NickChange { new_nick } => {
            info!("{}: registered as {}", serv, new_nick);
        }
        WireError(err) => {
            warn!("{}: wire protocol error: {}", serv, err);
        }
        Msg(msg) => {
            handle_irc_msg(serv, snd_conn, msg);
        }
    }
}

fn handle_irc_msg(serv: &str, snd_conn: &mpsc::UnboundedSender<ConnEv>, msg: wire::Msg) {
    use wire::Cmd::*;
    use wire::Pfx::*;

    let wire::Msg { pfx, cmd } = msg;

    // The sender's nick, for the messages where only a user makes sense.
    let pfx_nick = |pfx: Option<wire::Pfx>| -> Option<String> {
        match pfx {
            Some(User { nick, .. }) | Some(Ambiguous(nick)) => Some(nick),
            Some(Server(_)) | None => None,
        }
    };

    match cmd {
        PRIVMSG {
            target,
            msg,
            is_notice: false,
        } => {
            let chan = match target {
                wire::MsgTarget::Chan(chan) => chan,
                wire::MsgTarget::User(_) => return,
            };
            let nick = match pfx_nick(pfx) {
                Some(nick) => nick,
                None => {
                    debug!("{}: PRIVMSG without a user prefix: {:?}", serv, msg);
                    return;
                }
            };
            let _ = snd_conn.send(ConnEv::Msg {
                serv: serv.to_owned(),
                chan,
                body: MsgBody::now(msg, nick),
            });
        }

        TOPIC { chan, topic } => {
            let nick = match pfx_nick(pfx) {
                Some(nick) => nick,
                None => return,
            };
            let _ = snd_conn.send(ConnEv::Topic {
                serv: serv.to_owned(),
                chan,
                body: MsgBody::now(topic, nick),
            });
        }

        JOIN { chan } => {
            if let Some(nick) = pfx_nick(pfx) {
                let _ = snd_conn.send(ConnEv::NickAdd {
                    serv: serv.to_owned(),
                    chan,
                    nick: wire::drop_nick_prefix(&nick).to_owned(),
                });
            }
        }

        PART { chan, msg: _ } => {
            if let Some(nick) = pfx_nick(pfx) {
                let _ = snd_conn.send(ConnEv::NickRemove {
                    serv: serv.to_owned(),
                    chan,
                    nick,
                });
            }
        }

        QUIT { msg: _ } => {
            if let Some(nick) = pfx_nick(pfx) {
                let _ = snd_conn.send(ConnEv::NickQuit {
                    serv: serv.to_owned(),
                    nick,
                });
            }
        }

        // RPL_TOPIC: the topic a channel had when we joined. RFC 2812 says 2 arguments but some
        // servers send 3, with our nick first.
        Reply { num: 332, params } => {
            let n_params = params.len();
            if n_params == 2 || n_params == 3 {
                let chan = &params[n_params - 2];
                let topic = &params[n_params - 1];
                let _ = snd_conn.send(ConnEv::InitialTopic {
                    serv: serv.to_owned(),
                    chan: ChanName::new(chan.clone()),
                    topic: topic.clone(),
                });
            }
        }

        // RPL_NAMREPLY: list of users in a channel
        Reply { num: 353, params } => {
            if params.len() > 3 {
                let chan = ChanName::new(params[2].clone());
                for nick in params[3].split_whitespace() {
                    let _ = snd_conn.send(ConnEv::NickAdd {
                        serv: serv.to_owned(),
                        chan: chan.clone(),
                        nick: wire::drop_nick_prefix(nick).to_owned(),
                    });
                }
            }
        }

        ERROR { msg } => {
            warn!("{}: server error: {}", serv, msg);
        }

        PRIVMSG { .. } | PING { .. } | PONG { .. } | Reply { .. } | Other { .. } => {
            // Notices, pings and the remaining numeric noise are not channel history.
        }
    }
}
