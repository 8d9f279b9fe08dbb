//! IRC wire protocol message parsers and generators. Incomplete; only the messages the hirc
//! daemon needs are covered, and only from the client side of the protocol.

use libhirc_common::ChanName;

pub fn pass(pass: &str) -> String {
    format!("PASS {}\r\n", pass)
}

pub fn nick(arg: &str) -> String {
    format!("NICK {}\r\n", arg)
}

pub fn user(hostname: &str, realname: &str) -> String {
    format!("USER {} 8 * :{}\r\n", hostname, realname)
}

pub fn pong(arg: &str) -> String {
    format!("PONG {}\r\n", arg)
}

pub fn join<'a, I>(chans: I) -> String
where
    I: Iterator<Item = &'a ChanName> + 'a,
{
    let chans = chans.map(|c| c.display()).collect::<Vec<_>>();
    format!("JOIN {}\r\n", chans.join(","))
}

// IRC messages need to be shorter than 512 bytes (RFC 2812). We don't split long messages here;
// servers truncate what the local user over-types.
pub fn privmsg(msgtarget: &str, msg: &str) -> String {
    format!("PRIVMSG {} :{}\r\n", msgtarget, msg)
}

pub fn quit(reason: Option<String>) -> String {
    match reason {
        None => "QUIT\r\n".to_string(),
        Some(reason) => format!("QUIT :{}\r\n", reason),
    }
}

/// Sender of a message ("prefix" in the RFC). Parsed because users of this library need to
/// distinguish a server from a user: only user-originated PRIVMSGs become channel history.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Pfx {
    /// Sender is a server.
    Server(String),

    /// Sender is a nick.
    User {
        /// Nick of the sender
        nick: String,
        /// `user@host` part
        user: String,
    },

    /// The RFC leaves prefixes like "localhost" ambiguous between a server name and a nick.
    Ambiguous(String),
}

// RFC 2812 section 2.3.1
fn parse_pfx(pfx: &str) -> Pfx {
    match pfx.find(['!', '@']) {
        Some(idx) => Pfx::User {
            nick: pfx[0..idx].to_owned(),
            user: pfx[idx + 1..].to_owned(),
        },
        None => {
            // Chars that nicks can have but servernames cannot
            match pfx.find(['[', ']', '\\', '`', '_', '^', '{', '|', '}']) {
                Some(_) => Pfx::User {
                    nick: pfx.to_owned(),
                    user: "".to_owned(),
                },
                None => {
                    // Nicks can't have '.'
                    match pfx.find('.') {
                        Some(_) => Pfx::Server(pfx.to_owned()),
                        None => Pfx::Ambiguous(pfx.to_owned()),
                    }
                }
            }
        }
    }
}

/// Target of a message. The rule we follow: if a target starts with `#` it's a `Chan`, otherwise
/// it's a `User`. Host masks are not parsed.
#[derive(Debug, PartialEq, Eq)]
pub enum MsgTarget {
    Chan(ChanName),
    User(String),
}

/// An IRC message
#[derive(Debug, PartialEq, Eq)]
pub struct Msg {
    /// Sender of the message. Optional; when missing the message originated from the connection
    /// itself.
    pub pfx: Option<Pfx>,
    pub cmd: Cmd,
}

/// An IRC command or reply
#[derive(Debug, PartialEq, Eq)]
pub enum Cmd {
    /// A PRIVMSG or NOTICE. Check `is_notice` field.
    PRIVMSG {
        target: MsgTarget,
        msg: String,
        is_notice: bool,
    },

    JOIN {
        chan: ChanName,
    },

    PART {
        chan: ChanName,
        msg: Option<String>,
    },

    QUIT {
        msg: Option<String>,
    },

    TOPIC {
        chan: ChanName,
        topic: String,
    },

    PING {
        server: String,
    },

    PONG {
        server: String,
    },

    ERROR {
        msg: String,
    },

    /// An IRC message other than the ones listed above.
    Other {
        cmd: String,
        params: Vec<String>,
    },

    /// Numeric replies are kept generic; we only need a handful of them.
    Reply {
        num: u16,
        params: Vec<String>,
    },
}

/// An intermediate type used during parsing.
enum MsgType<'a> {
    Cmd(&'a str),
    Num(u16),
}

static CRLF: [u8; 2] = [b'\r', b'\n'];

/// Try to read an IRC message off a buffer. Drops the message from the buffer when parsing is
/// successful. Otherwise the buffer is left unchanged.
pub fn parse_irc_msg(buf: &mut Vec<u8>) -> Option<Result<Msg, String>> {
    // Find "\r\n" before generating the lossy UTF-8; replacement characters may change sizes.
    let crlf_idx = match buf.windows(2).position(|sub| sub == CRLF) {
        None => return None,
        Some(i) => i,
    };

    let msg_owned: String = String::from_utf8_lossy(&buf[0..crlf_idx]).to_string();
    let ret = parse_one_message(&msg_owned);
    buf.drain(0..crlf_idx + 2);

    Some(ret)
}

// NB. 'msg' does not contain the '\r\n' suffix.
fn parse_one_message(mut msg: &str) -> Result<Msg, String> {
    let pfx: Option<Pfx> = {
        if let Some(':') = msg.chars().next() {
            let ws_idx = msg.find(' ').ok_or(format!(
                "Can't find prefix terminator (' ') in msg: {:?}",
                msg
            ))?;
            let pfx = &msg[1..ws_idx]; // consume ':'
            msg = &msg[ws_idx + 1..]; // consume ' '
            Some(parse_pfx(pfx))
        } else {
            None
        }
    };

    let msg_ty: MsgType = {
        let ws_idx = msg.find(' ').ok_or(format!(
            "Can't find message type terminator (' ') in msg: {:?}",
            msg
        ))?;
        let cmd = &msg[..ws_idx];
        msg = &msg[ws_idx + 1..]; // consume ' '
        match cmd.parse::<u16>() {
            Ok(num) => MsgType::Num(num),
            Err(_) => MsgType::Cmd(cmd),
        }
    };

    let params = parse_params(msg);
    let cmd = match msg_ty {
        MsgType::Cmd("PRIVMSG") | MsgType::Cmd("NOTICE") if params.len() == 2 => {
            let is_notice = matches!(msg_ty, MsgType::Cmd("NOTICE"));
            let target = params[0];
            let target = if target.starts_with('#') {
                MsgTarget::Chan(ChanName::new(target.to_owned()))
            } else {
                MsgTarget::User(target.to_owned())
            };
            Cmd::PRIVMSG {
                target,
                msg: params[1].to_owned(),
                is_notice,
            }
        }
        MsgType::Cmd("JOIN") if params.len() == 1 => Cmd::JOIN {
            chan: ChanName::new(params[0].to_owned()),
        },
        MsgType::Cmd("PART") if !params.is_empty() => Cmd::PART {
            chan: ChanName::new(params[0].to_owned()),
            msg: params.get(1).map(|s| (*s).to_owned()),
        },
        MsgType::Cmd("QUIT") => Cmd::QUIT {
            msg: params.first().map(|s| (*s).to_owned()),
        },
        MsgType::Cmd("TOPIC") if params.len() == 2 => Cmd::TOPIC {
            chan: ChanName::new(params[0].to_owned()),
            topic: params[1].to_owned(),
        },
        MsgType::Cmd("PING") if !params.is_empty() => Cmd::PING {
            server: params[0].to_owned(),
        },
        MsgType::Cmd("PONG") if !params.is_empty() => Cmd::PONG {
            server: params[0].to_owned(),
        },
        MsgType::Cmd("ERROR") if params.len() == 1 => Cmd::ERROR {
            msg: params[0].to_owned(),
        },
        MsgType::Num(num) => Cmd::Reply {
            num,
            params: params.into_iter().map(|s| s.to_owned()).collect(),
        },
        MsgType::Cmd(cmd) => Cmd::Other {
            cmd: cmd.to_owned(),
            params: params.into_iter().map(|s| s.to_owned()).collect(),
        },
    };

    Ok(Msg { pfx, cmd })
}

fn parse_params(mut msg: &str) -> Vec<&str> {
    let mut ret: Vec<&str> = Vec::new();
    loop {
        if msg.is_empty() {
            break;
        }
        if let Some(trailing) = msg.strip_prefix(':') {
            ret.push(trailing);
            break;
        }
        match msg.find(' ') {
            None => {
                ret.push(msg);
                break;
            }
            Some(ws_idx) => {
                ret.push(&msg[..ws_idx]);
                msg = &msg[ws_idx + 1..];
            }
        }
    }
    ret
}

/// Nicks may appear in NAMES lists with "membership prefixes" showing op or voice status. Drop
/// them. https://modern.ircdocs.horse/#channel-membership-prefixes
pub fn drop_nick_prefix(nick: &str) -> &str {
    match nick.strip_prefix(['~', '&', '@', '%', '+']) {
        Some(rest) => rest,
        None => nick,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_privmsg_to_chan() {
        let mut buf = b":alice!a@example.com PRIVMSG #tiny :hello world\r\n".to_vec();
        let msg = parse_irc_msg(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty());
        assert_eq!(
            msg,
            Msg {
                pfx: Some(Pfx::User {
                    nick: "alice".to_owned(),
                    user: "a@example.com".to_owned(),
                }),
                cmd: Cmd::PRIVMSG {
                    target: MsgTarget::Chan(ChanName::new("#tiny".to_owned())),
                    msg: "hello world".to_owned(),
                    is_notice: false,
                },
            }
        );
    }

    #[test]
    fn parse_numeric_reply() {
        let mut buf = b":irc.example.com 001 milo :Welcome to IRC\r\n".to_vec();
        let msg = parse_irc_msg(&mut buf).unwrap().unwrap();
        assert_eq!(
            msg.cmd,
            Cmd::Reply {
                num: 1,
                params: vec!["milo".to_owned(), "Welcome to IRC".to_owned()],
            }
        );
    }

    #[test]
    fn parse_waits_for_crlf() {
        let mut buf = b"PING :irc.example".to_vec();
        assert!(parse_irc_msg(&mut buf).is_none());
        buf.extend_from_slice(b".com\r\n");
        let msg = parse_irc_msg(&mut buf).unwrap().unwrap();
        assert_eq!(
            msg.cmd,
            Cmd::PING {
                server: "irc.example.com".to_owned(),
            }
        );
    }

    #[test]
    fn parse_server_pfx() {
        let mut buf = b":irc.example.com TOPIC #a :the topic\r\n".to_vec();
        let msg = parse_irc_msg(&mut buf).unwrap().unwrap();
        assert_eq!(msg.pfx, Some(Pfx::Server("irc.example.com".to_owned())));
    }

    #[test]
    fn drop_membership_prefix() {
        assert_eq!(drop_nick_prefix("@op"), "op");
        assert_eq!(drop_nick_prefix("+voiced"), "voiced");
        assert_eq!(drop_nick_prefix("plain"), "plain");
    }
}
