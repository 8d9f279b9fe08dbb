//! Types shared by the hirc daemon, the envelope codec and the terminal client.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, FixedOffset, Local};

// Channel name folding per RFC 2812 section 2.2: ASCII letters compare lowercased, and
// '[', ']', '\\', '~' fold to '{', '}', '|', '^' (the RFC treats them as case pairs).
// Non-ASCII characters are left unchanged.
fn fold_char(c: char) -> char {
    match c {
        '[' => '{',
        ']' => '}',
        '\\' => '|',
        '~' => '^',
        _ => c.to_ascii_lowercase(),
    }
}

/// An IRC channel name. Channel names are case insensitive, so the name is folded once at
/// construction and `Eq`, `Ord` and `Hash` only ever look at the folded form; `display` keeps
/// the casing the server (or the user) used. Names always arrive owned here, off the wire or
/// out of the config, so there is no borrowed variant.
#[derive(Debug, Clone)]
pub struct ChanName {
    display: String,
    folded: String,
}

impl ChanName {
    pub fn new(name: String) -> ChanName {
        let folded = name.chars().map(fold_char).collect();
        ChanName {
            display: name,
            folded,
        }
    }

    pub fn display(&self) -> &str {
        &self.display
    }

    /// The case-folded form, what equality and ordering are decided on.
    pub fn folded(&self) -> &str {
        &self.folded
    }
}

impl PartialEq for ChanName {
    fn eq(&self, other: &Self) -> bool {
        self.folded == other.folded
    }
}

impl Eq for ChanName {}

impl Hash for ChanName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.folded.hash(state)
    }
}

impl PartialOrd for ChanName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChanName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.folded.cmp(&other.folded)
    }
}

/// A channel fully qualified with the server it lives on. Server names are opaque config labels
/// and compare by byte value; the channel part compares case insensitively. The hand-written
/// `Ord` gives the lexical pair order, so a sorted channel catalog is stable across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChanId {
    pub serv: String,
    pub chan: ChanName,
}

impl ChanId {
    pub fn new(serv: &str, chan: &str) -> ChanId {
        ChanId {
            serv: serv.to_owned(),
            chan: ChanName::new(chan.to_owned()),
        }
    }
}

impl PartialOrd for ChanId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChanId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.serv
            .cmp(&other.serv)
            .then_with(|| self.chan.cmp(&other.chan))
    }
}

impl fmt::Display for ChanId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.serv, self.chan.display())
    }
}

/// Identifies one local client session for the lifetime of the daemon. Ids start at 1 and are
/// never reused, even after the client disconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "client {}", self.0)
    }
}

/// Payload shared by chat and topic messages: who said what, when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgBody {
    pub text: String,
    pub author: String,
    pub ts: DateTime<FixedOffset>,
}

impl MsgBody {
    /// A message body stamped with the current wall clock.
    pub fn now(text: String, author: String) -> MsgBody {
        MsgBody {
            text,
            author,
            ts: Local::now().fixed_offset(),
        }
    }
}

/// A message in a channel log: either a chat line or a topic change. Both variants carry the same
/// payload shape; the tag is what the wire format and the client rendering care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChanMsg {
    Chat(MsgBody),
    Topic(MsgBody),
}

impl ChanMsg {
    pub fn body(&self) -> &MsgBody {
        match self {
            ChanMsg::Chat(body) | ChanMsg::Topic(body) => body,
        }
    }
}

/// Point-in-time snapshot of a channel, as shipped to a client in a `Subscriptions` reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChanData {
    pub nicks: Vec<String>,
    pub msgs: Vec<ChanMsg>,
    pub topic: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chan_name_case_insensitive() {
        let a = ChanName::new("#Tiny".to_owned());
        let b = ChanName::new("#tiny".to_owned());
        assert_eq!(a, b);
        assert_eq!(a.display(), "#Tiny");

        // RFC 2812 section 2.2 case pairs
        let a = ChanName::new("#x[y]~".to_owned());
        let b = ChanName::new("#x{y}^".to_owned());
        assert_eq!(a, b);
        assert_eq!(a.folded(), "#x{y}^");
    }

    #[test]
    fn chan_name_hash_follows_eq() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(ChanName::new("#RUST".to_owned()));
        assert!(set.contains(&ChanName::new("#rust".to_owned())));
    }

    #[test]
    fn chan_id_order_is_lexical_pair() {
        let mut ids = vec![
            ChanId::new("ts", "#b"),
            ChanId::new("libera", "#Z"),
            ChanId::new("ts", "#A"),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                ChanId::new("libera", "#Z"),
                ChanId::new("ts", "#A"),
                ChanId::new("ts", "#b"),
            ]
        );
    }

    #[test]
    fn chan_msg_variants_share_body() {
        let body = MsgBody::now("hi".to_owned(), "alice".to_owned());
        assert_eq!(ChanMsg::Chat(body.clone()).body(), &body);
        assert_eq!(ChanMsg::Topic(body.clone()).body(), &body);
    }
}
