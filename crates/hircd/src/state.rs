//! The daemon's shared state region: the server/channel map, the client registry and the
//! subscription index, plus the client id counter.
//!
//! Everything lives in `Rc<RefCell<..>>` cells on the single-threaded runtime, and no method here
//! ever awaits, so each method is one atomic section. The dispatcher is the only caller that
//! mutates channel data and subscriptions; the listener only calls `accept_client`.

use libhirc_common::{ChanData, ChanId, ChanMsg, ChanName, ClientId};
use libhirc_wire::ClientMsg;

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use tokio::sync::mpsc;

/// One channel as the daemon knows it. The message log grows without bound; trimming is a
/// deliberate non-goal of this daemon.
#[derive(Default)]
pub(crate) struct Chan {
    pub(crate) topic: String,
    pub(crate) msgs: Vec<ChanMsg>,
    pub(crate) nicks: HashSet<String>,
}

pub(crate) struct Server {
    /// Key order gives the Hello catalog its stable order.
    pub(crate) chans: BTreeMap<ChanName, Chan>,

    /// Whether the upstream session is currently up. The connection handles themselves live in
    /// the dispatcher's link bundle; this flag is flipped by `ConnEv::Up`/`Down`.
    pub(crate) connected: bool,
}

struct ClientEntry {
    /// The session's outbound queue. Dropping this closes the queue; the session writer then
    /// drains what is left and exits.
    snd_out: mpsc::UnboundedSender<ClientMsg>,
    chans: HashSet<ChanId>,
}

#[derive(Clone)]
pub(crate) struct SharedState {
    servers: Rc<RefCell<BTreeMap<String, Server>>>,
    registry: Rc<RefCell<HashMap<ClientId, ClientEntry>>>,
    subs: Rc<RefCell<HashMap<ChanId, HashSet<ClientId>>>>,
    next_client_id: Rc<Cell<u64>>,
}

impl SharedState {
    /// Build the initial server map from configuration: every configured server with its default
    /// channels, all empty, none connected yet.
    pub(crate) fn new<I>(servers: I) -> SharedState
    where
        I: IntoIterator<Item = (String, Vec<ChanName>)>,
    {
        let servers = servers
            .into_iter()
            .map(|(name, chans)| {
                let chans = chans
                    .into_iter()
                    .map(|chan| (chan, Chan::default()))
                    .collect();
                (
                    name,
                    Server {
                        chans,
                        connected: false,
                    },
                )
            })
            .collect();

        SharedState {
            servers: Rc::new(RefCell::new(servers)),
            registry: Rc::new(RefCell::new(HashMap::new())),
            subs: Rc::new(RefCell::new(HashMap::new())),
            next_client_id: Rc::new(Cell::new(1)),
        }
    }

    //
    // Client registry
    //

    /// Register a new client session: allocate the next id, create its outbound queue and
    /// enqueue the Hello listing every channel the daemon currently knows. One atomic section,
    /// so ids are unique and the Hello is always the queue's first message.
    pub(crate) fn accept_client(&self) -> (ClientId, mpsc::UnboundedReceiver<ClientMsg>) {
        let client_id = ClientId(self.next_client_id.get());
        self.next_client_id.set(client_id.0 + 1);

        let (snd_out, rcv_out) = mpsc::unbounded_channel();

        let hello = ClientMsg::Hello {
            client_id,
            chans: self.catalog(),
        };
        // The queue was created a moment ago and can't be closed yet.
        let _ = snd_out.send(hello);

        self.registry.borrow_mut().insert(
            client_id,
            ClientEntry {
                snd_out,
                chans: HashSet::new(),
            },
        );

        (client_id, rcv_out)
    }

    /// Remove a client: close its outbound queue and clear it out of every subscription bucket.
    /// Safe to call twice; the second call is a no-op.
    pub(crate) fn drop_client(&self, client_id: ClientId) {
        let entry = match self.registry.borrow_mut().remove(&client_id) {
            None => return,
            Some(entry) => entry,
        };

        let mut subs = self.subs.borrow_mut();
        for chan in &entry.chans {
            if let Some(clients) = subs.get_mut(chan) {
                clients.remove(&client_id);
            }
        }
        // Dropping `entry.snd_out` here closes the queue.
    }

    /// Close every client queue. Used at shutdown; the session writers drain and exit.
    pub(crate) fn close_all_clients(&self) {
        self.registry.borrow_mut().clear();
        self.subs.borrow_mut().clear();
    }

    /// Enqueue a message to one client. Writing to a closed or removed queue is a no-op.
    pub(crate) fn send_to(&self, client_id: ClientId, msg: ClientMsg) {
        if let Some(entry) = self.registry.borrow().get(&client_id) {
            let _ = entry.snd_out.send(msg);
        }
    }

    //
    // Subscriptions
    //

    /// Record that `client_id` wants `chan`'s traffic. Idempotent. The channel is materialized
    /// first so that every subscription always points at an existing channel, even when the
    /// client subscribes before the server connects.
    pub(crate) fn subscribe(&self, client_id: ClientId, chan: &ChanId) {
        self.ensure_chan(chan);
        if let Some(entry) = self.registry.borrow_mut().get_mut(&client_id) {
            entry.chans.insert(chan.clone());
        }
        self.subs
            .borrow_mut()
            .entry(chan.clone())
            .or_default()
            .insert(client_id);
    }

    pub(crate) fn subscribers(&self, chan: &ChanId) -> Vec<ClientId> {
        match self.subs.borrow().get(chan) {
            None => Vec::new(),
            Some(clients) => clients.iter().copied().collect(),
        }
    }

    //
    // Server / channel data
    //

    /// All channels the daemon knows about, in stable (server, channel) order.
    pub(crate) fn catalog(&self) -> Vec<ChanId> {
        let mut chans = Vec::new();
        for (serv, server) in self.servers.borrow().iter() {
            for chan in server.chans.keys() {
                chans.push(ChanId {
                    serv: serv.clone(),
                    chan: chan.clone(),
                });
            }
        }
        chans
    }

    /// Create the channel (and, for eager subscriptions, the server) if it doesn't exist yet.
    pub(crate) fn ensure_chan(&self, chan: &ChanId) {
        let mut servers = self.servers.borrow_mut();
        let server = servers.entry(chan.serv.clone()).or_insert_with(|| Server {
            chans: BTreeMap::new(),
            connected: false,
        });
        server.chans.entry(chan.chan.clone()).or_default();
    }

    /// Point-in-time snapshot of a channel. Unknown channels snapshot as empty.
    pub(crate) fn chan_snapshot(&self, chan: &ChanId) -> ChanData {
        let servers = self.servers.borrow();
        match servers.get(&chan.serv).and_then(|s| s.chans.get(&chan.chan)) {
            None => ChanData::default(),
            Some(state) => {
                let mut nicks: Vec<String> = state.nicks.iter().cloned().collect();
                nicks.sort();
                ChanData {
                    nicks,
                    msgs: state.msgs.clone(),
                    topic: state.topic.clone(),
                }
            }
        }
    }

    /// Append a message to a channel's log, creating the channel on first sight.
    pub(crate) fn push_msg(&self, chan: &ChanId, msg: ChanMsg) {
        self.ensure_chan(chan);
        let mut servers = self.servers.borrow_mut();
        let state = servers
            .get_mut(&chan.serv)
            .and_then(|s| s.chans.get_mut(&chan.chan))
            .expect("channel was just materialized");
        state.msgs.push(msg);
    }

    pub(crate) fn set_topic(&self, chan: &ChanId, topic: String) {
        self.ensure_chan(chan);
        let mut servers = self.servers.borrow_mut();
        let state = servers
            .get_mut(&chan.serv)
            .and_then(|s| s.chans.get_mut(&chan.chan))
            .expect("channel was just materialized");
        state.topic = topic;
    }

    pub(crate) fn add_nick(&self, chan: &ChanId, nick: String) {
        self.ensure_chan(chan);
        let mut servers = self.servers.borrow_mut();
        let state = servers
            .get_mut(&chan.serv)
            .and_then(|s| s.chans.get_mut(&chan.chan))
            .expect("channel was just materialized");
        state.nicks.insert(nick);
    }

    pub(crate) fn remove_nick(&self, chan: &ChanId, nick: &str) {
        let mut servers = self.servers.borrow_mut();
        if let Some(state) = servers
            .get_mut(&chan.serv)
            .and_then(|s| s.chans.get_mut(&chan.chan))
        {
            state.nicks.remove(nick);
        }
    }

    /// Remove a nick from every channel of a server, for QUITs.
    pub(crate) fn remove_nick_everywhere(&self, serv: &str, nick: &str) {
        let mut servers = self.servers.borrow_mut();
        if let Some(server) = servers.get_mut(serv) {
            for state in server.chans.values_mut() {
                state.nicks.remove(nick);
            }
        }
    }

    pub(crate) fn set_connected(&self, serv: &str, connected: bool) {
        let mut servers = self.servers.borrow_mut();
        if let Some(server) = servers.get_mut(serv) {
            server.connected = connected;
        }
    }

    pub(crate) fn is_connected(&self, serv: &str) -> bool {
        self.servers
            .borrow()
            .get(serv)
            .map(|server| server.connected)
            .unwrap_or(false)
    }

    //
    // Test visibility
    //

    #[cfg(test)]
    pub(crate) fn has_client(&self, client_id: ClientId) -> bool {
        self.registry.borrow().contains_key(&client_id)
    }

    #[cfg(test)]
    pub(crate) fn client_chans(&self, client_id: ClientId) -> Option<HashSet<ChanId>> {
        self.registry
            .borrow()
            .get(&client_id)
            .map(|entry| entry.chans.clone())
    }

    #[cfg(test)]
    pub(crate) fn chan_exists(&self, chan: &ChanId) -> bool {
        self.servers
            .borrow()
            .get(&chan.serv)
            .is_some_and(|s| s.chans.contains_key(&chan.chan))
    }

    /// Check the two sides of the subscription bookkeeping against each other: a client is in a
    /// channel's bucket iff the channel is in the client's subscribed set, and every subscribed
    /// channel exists in the server map.
    #[cfg(test)]
    pub(crate) fn assert_subs_consistent(&self) {
        let registry = self.registry.borrow();
        let subs = self.subs.borrow();

        for (chan, clients) in subs.iter() {
            for client_id in clients {
                let entry = registry
                    .get(client_id)
                    .unwrap_or_else(|| panic!("{} in index but not registered", client_id));
                assert!(
                    entry.chans.contains(chan),
                    "{} in bucket of {} but not subscribed to it",
                    client_id,
                    chan
                );
            }
        }

        for (client_id, entry) in registry.iter() {
            for chan in &entry.chans {
                assert!(
                    subs.get(chan).is_some_and(|c| c.contains(client_id)),
                    "{} subscribed to {} but missing from its bucket",
                    client_id,
                    chan
                );
                assert!(
                    self.servers
                        .borrow()
                        .get(&chan.serv)
                        .is_some_and(|s| s.chans.contains_key(&chan.chan)),
                    "subscribed channel {} does not exist",
                    chan
                );
            }
        }
    }
}
