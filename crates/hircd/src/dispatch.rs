//! The dispatcher: the single consumer of the daemon request queue and the IRC inbound queue,
//! and the sole mutator of channel data and subscriptions.
//!
//! Every handler is a synchronous function, so a channel-log append and the fan-out it triggers
//! happen in one uninterrupted step: all subscribers see one total order per channel.

use crate::state::SharedState;

use libhirc_common::{ChanId, ChanMsg, ChanName, ClientId, MsgBody};
use libhirc_wire::{ClientMsg, DaemonMsg};

use std::collections::HashMap;
use std::rc::Rc;

use tokio::sync::mpsc;

/// Author label used for the local echo of messages this daemon's user sends.
// TODO: substitute the server's accepted nick (Client::get_nick) once local clients can render it
pub(crate) const ECHO_AUTHOR: &str = "ME";

/// What the IRC connectors put on the inbound queue. Connection liveness travels the same queue
/// as messages so that nothing but the dispatcher ever touches server state.
#[derive(Debug)]
pub(crate) enum ConnEv {
    /// Upstream session established.
    Up { serv: String },
    /// Upstream session lost. The connector retries on its own; until then sends to this server
    /// are dropped.
    Down { serv: String },
    /// A channel message arrived. The sender's nick is `body.author`.
    Msg {
        serv: String,
        chan: ChanName,
        body: MsgBody,
    },
    /// Someone changed a channel topic.
    Topic {
        serv: String,
        chan: ChanName,
        body: MsgBody,
    },
    /// The topic a channel already had when we joined.
    InitialTopic {
        serv: String,
        chan: ChanName,
        topic: String,
    },
    /// A nick appeared in a channel (JOIN or a NAMES reply).
    NickAdd {
        serv: String,
        chan: ChanName,
        nick: String,
    },
    /// A nick left a channel.
    NickRemove {
        serv: String,
        chan: ChanName,
        nick: String,
    },
    /// A nick quit the server entirely.
    NickQuit { serv: String, nick: String },
}

/// A request read from a client session: the session's id plus the decoded command.
pub(crate) type Request = (ClientId, DaemonMsg);

/// The dispatcher's outbound-IRC capability. The real implementation routes through the
/// per-server connection handles.
pub(crate) trait IrcLinks {
    /// Send a channel message upstream. Dropped silently when the server is unknown or its
    /// session is down; the caller has already logged the message locally.
    fn send_privmsg(&self, serv: &str, chan: &ChanName, msg: &str);
}

/// The real link bundle: one `libhirc_client::Client` per configured server.
pub(crate) struct ClientLinks {
    clients: HashMap<String, libhirc_client::Client>,
}

impl ClientLinks {
    pub(crate) fn new() -> ClientLinks {
        ClientLinks {
            clients: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, serv: String, client: libhirc_client::Client) {
        self.clients.insert(serv, client);
    }

    /// QUIT every session, for shutdown.
    pub(crate) fn quit_all(&self) {
        for client in self.clients.values() {
            client.quit(None);
        }
    }
}

impl IrcLinks for ClientLinks {
    fn send_privmsg(&self, serv: &str, chan: &ChanName, msg: &str) {
        match self.clients.get(serv) {
            Some(client) => client.privmsg(chan.display(), msg),
            None => {
                debug!("dropping message to unknown server {}", serv);
            }
        }
    }
}

pub(crate) struct Dispatcher {
    state: SharedState,
    links: Rc<dyn IrcLinks>,
    rcv_req: mpsc::UnboundedReceiver<Request>,
    rcv_conn: mpsc::UnboundedReceiver<ConnEv>,
}

impl Dispatcher {
    pub(crate) fn new(
        state: SharedState,
        links: Rc<dyn IrcLinks>,
        rcv_req: mpsc::UnboundedReceiver<Request>,
        rcv_conn: mpsc::UnboundedReceiver<ConnEv>,
    ) -> Dispatcher {
        Dispatcher {
            state,
            links,
            rcv_req,
            rcv_conn,
        }
    }

    /// Run until both inbound queues close. `select!` polls the two branches in random order, so
    /// neither queue can starve the other.
    pub(crate) async fn run(mut self) {
        let mut req_open = true;
        let mut conn_open = true;

        while req_open || conn_open {
            tokio::select! {
                req = self.rcv_req.recv(), if req_open => {
                    match req {
                        None => req_open = false,
                        Some((client_id, msg)) => self.handle_request(client_id, msg),
                    }
                }
                ev = self.rcv_conn.recv(), if conn_open => {
                    match ev {
                        None => conn_open = false,
                        Some(ev) => self.handle_conn_ev(ev),
                    }
                }
            }
        }

        debug!("dispatcher: both queues closed, stopping");
    }

    fn handle_request(&self, client_id: ClientId, msg: DaemonMsg) {
        match msg {
            DaemonMsg::Subscribe { chans } => {
                let mut reply = Vec::with_capacity(chans.len());
                for chan in &chans {
                    self.state.subscribe(client_id, chan);
                    reply.push((chan.clone(), self.state.chan_snapshot(chan)));
                }
                self.state
                    .send_to(client_id, ClientMsg::Subscriptions { chans: reply });
            }

            DaemonMsg::SendMessage { target, text } => {
                if !self.state.is_connected(&target.serv) {
                    debug!("{}: down, message is only logged locally", target.serv);
                }
                self.links.send_privmsg(&target.serv, &target.chan, &text);
                let body = MsgBody::now(text, ECHO_AUTHOR.to_owned());
                self.append_and_fan_out(&target, ChanMsg::Chat(body));
            }

            DaemonMsg::Goodbye => {
                debug!("{} said goodbye", client_id);
                self.state.drop_client(client_id);
            }
        }
    }

    fn handle_conn_ev(&self, ev: ConnEv) {
        match ev {
            ConnEv::Up { serv } => {
                info!("{}: connected", serv);
                self.state.set_connected(&serv, true);
            }
            ConnEv::Down { serv } => {
                warn!("{}: disconnected", serv);
                self.state.set_connected(&serv, false);
            }
            ConnEv::Msg { serv, chan, body } => {
                let target = ChanId { serv, chan };
                self.append_and_fan_out(&target, ChanMsg::Chat(body));
            }
            ConnEv::Topic { serv, chan, body } => {
                let target = ChanId { serv, chan };
                self.state.set_topic(&target, body.text.clone());
                self.state.push_msg(&target, ChanMsg::Topic(body.clone()));
                self.fan_out(&target, |target| ClientMsg::NewTopic {
                    target,
                    msg: ChanMsg::Topic(body.clone()),
                });
            }
            ConnEv::InitialTopic { serv, chan, topic } => {
                let target = ChanId { serv, chan };
                self.state.set_topic(&target, topic.clone());
                self.fan_out(&target, |target| ClientMsg::InitialTopic {
                    target,
                    topic: topic.clone(),
                });
            }
            ConnEv::NickAdd { serv, chan, nick } => {
                self.state.add_nick(&ChanId { serv, chan }, nick);
            }
            ConnEv::NickRemove { serv, chan, nick } => {
                self.state.remove_nick(&ChanId { serv, chan }, &nick);
            }
            ConnEv::NickQuit { serv, nick } => {
                self.state.remove_nick_everywhere(&serv, &nick);
            }
        }
    }

    /// Append to the channel log and enqueue a `NewMessage` to every subscriber, in one step.
    fn append_and_fan_out(&self, target: &ChanId, msg: ChanMsg) {
        self.state.push_msg(target, msg.clone());
        self.fan_out(target, |target| ClientMsg::NewMessage {
            target,
            msg: msg.clone(),
        });
    }

    fn fan_out<F>(&self, target: &ChanId, mut mk_msg: F)
    where
        F: FnMut(ChanId) -> ClientMsg,
    {
        for client_id in self.state.subscribers(target) {
            self.state.send_to(client_id, mk_msg(target.clone()));
        }
    }
}
