//! Connection registration state: the PASS/NICK/USER exchange, nick retries, the post-welcome
//! identification command and automatic channel joins.

use crate::wire;
use crate::{Event, ServerInfo};

use std::cell::RefCell;
use std::rc::Rc;

use tokio::sync::mpsc::Sender;

#[derive(Clone)]
pub(crate) struct Session {
    inner: Rc<RefCell<SessionInner>>,
}

struct SessionInner {
    info: ServerInfo,

    /// The nick we currently use or try to register. Starts as `info.nick`; grows a trailing
    /// underscore per ERR_NICKNAMEINUSE until the server accepts one.
    current_nick: String,

    /// Did the server accept our registration (001 seen on this connection)?
    welcomed: bool,
}

impl Session {
    pub(crate) fn new(info: ServerInfo) -> Session {
        let current_nick = info.nick.clone();
        Session {
            inner: Rc::new(RefCell::new(SessionInner {
                info,
                current_nick,
                welcomed: false,
            })),
        }
    }

    /// Back to the initial state, for a fresh connection.
    pub(crate) fn reset(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.current_nick = inner.info.nick.clone();
        inner.welcomed = false;
    }

    pub(crate) fn get_nick(&self) -> String {
        self.inner.borrow().current_nick.clone()
    }

    /// Send the registration commands for a newly established connection.
    pub(crate) fn introduce(&self, snd_msg: &Sender<String>) {
        let inner = self.inner.borrow();
        if let Some(pass) = &inner.info.pass {
            let _ = snd_msg.try_send(wire::pass(pass));
        }
        let _ = snd_msg.try_send(wire::nick(&inner.current_nick));
        let _ = snd_msg.try_send(wire::user(&inner.info.nick, &inner.info.nick));
    }

    /// React to a parsed server message: PINGs, the 001 welcome, nick collisions. Everything
    /// else is the caller's business.
    pub(crate) fn update(&self, msg: &wire::Msg, snd_ev: &Sender<Event>, snd_msg: &Sender<String>) {
        let mut inner = self.inner.borrow_mut();
        match &msg.cmd {
            wire::Cmd::PING { server } => {
                let _ = snd_msg.try_send(wire::pong(server));
            }

            // RPL_WELCOME: registration done, identify and join configured channels
            wire::Cmd::Reply { num: 1, .. } => {
                inner.welcomed = true;
                if let (Some(ident_cmd), Some(pass)) = (&inner.info.ident_cmd, &inner.info.pass) {
                    let _ = snd_msg.try_send(format!("{}\r\n", ident_cmd.replace("{}", pass)));
                }
                if !inner.info.auto_join.is_empty() {
                    let _ = snd_msg.try_send(wire::join(inner.info.auto_join.iter()));
                }
                let _ = snd_ev.try_send(Event::NickChange {
                    new_nick: inner.current_nick.clone(),
                });
            }

            // ERR_NICKNAMEINUSE: try the next underscored variant while still registering
            wire::Cmd::Reply { num: 433, .. } => {
                if !inner.welcomed {
                    inner.current_nick.push('_');
                    let _ = snd_msg.try_send(wire::nick(&inner.current_nick));
                }
            }

            _ => {}
        }
    }
}
