use crate::dispatch::{ConnEv, Dispatcher, IrcLinks, Request, ECHO_AUTHOR};
use crate::state::SharedState;

use libhirc_common::{ChanData, ChanId, ChanMsg, ChanName, ClientId, MsgBody};
use libhirc_wire::{ClientMsg, DaemonMsg, DaemonRequest};

use std::cell::RefCell;
use std::collections::HashSet;
use std::future::Future;
use std::rc::Rc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

/// Records outbound IRC sends instead of talking to a server.
#[derive(Clone, Default)]
struct FakeLinks {
    sent: Rc<RefCell<Vec<(String, String, String)>>>,
}

impl IrcLinks for FakeLinks {
    fn send_privmsg(&self, serv: &str, chan: &ChanName, msg: &str) {
        self.sent
            .borrow_mut()
            .push((serv.to_owned(), chan.display().to_owned(), msg.to_owned()));
    }
}

struct TestSetup {
    state: SharedState,
    /// Send client requests to the dispatcher using this channel
    snd_req: mpsc::UnboundedSender<Request>,
    /// Send IRC connector events to the dispatcher using this channel
    snd_conn: mpsc::UnboundedSender<ConnEv>,
    links: FakeLinks,
}

fn run_test<F, Fut>(servers: Vec<(&str, Vec<&str>)>, test: F)
where
    F: FnOnce(TestSetup) -> Fut,
    Fut: Future<Output = ()>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let local = tokio::task::LocalSet::new();

    local.block_on(&runtime, async move {
        let state = SharedState::new(servers.into_iter().map(|(serv, chans)| {
            let chans = chans
                .into_iter()
                .map(|chan| ChanName::new(chan.to_owned()))
                .collect();
            (serv.to_owned(), chans)
        }));

        let (snd_req, rcv_req) = mpsc::unbounded_channel();
        let (snd_conn, rcv_conn) = mpsc::unbounded_channel();
        let links = FakeLinks::default();

        tokio::task::spawn_local(
            Dispatcher::new(state.clone(), Rc::new(links.clone()), rcv_req, rcv_conn).run(),
        );

        test(TestSetup {
            state,
            snd_req,
            snd_conn,
            links,
        })
        .await;
    });
}

/// Let the dispatcher task run.
async fn yield_(n: usize) {
    for _ in 0..n {
        tokio::task::yield_now().await;
    }
}

fn chan(serv: &str, chan: &str) -> ChanId {
    ChanId::new(serv, chan)
}

fn subscribe(snd_req: &mpsc::UnboundedSender<Request>, client_id: ClientId, chans: Vec<ChanId>) {
    snd_req
        .send((client_id, DaemonMsg::Subscribe { chans }))
        .unwrap();
}

fn recent(ts: &chrono::DateTime<chrono::FixedOffset>) -> bool {
    (chrono::Local::now().fixed_offset() - *ts).num_seconds().abs() <= 1
}

#[test]
fn hello_enumerates_known_channels() {
    run_test(vec![("ts", vec!["#a", "#b"])], |setup| async move {
        let (client_id, mut rcv_out) = setup.state.accept_client();
        assert_eq!(client_id, ClientId(1));

        match rcv_out.recv().await.unwrap() {
            ClientMsg::Hello {
                client_id,
                mut chans,
            } => {
                assert_eq!(client_id, ClientId(1));
                chans.sort();
                assert_eq!(chans, vec![chan("ts", "#a"), chan("ts", "#b")]);
            }
            other => panic!("expected Hello, got {:?}", other),
        }
    });
}

#[test]
fn subscribe_replies_with_snapshot() {
    run_test(vec![("ts", vec!["#a", "#b"])], |setup| async move {
        let (client_id, mut rcv_out) = setup.state.accept_client();
        let _hello = rcv_out.recv().await.unwrap();

        subscribe(&setup.snd_req, client_id, vec![chan("ts", "#a")]);

        assert_eq!(
            rcv_out.recv().await.unwrap(),
            ClientMsg::Subscriptions {
                chans: vec![(chan("ts", "#a"), ChanData::default())],
            }
        );
        setup.state.assert_subs_consistent();
    });
}

#[test]
fn send_message_echoes_locally() {
    run_test(vec![("ts", vec!["#a"])], |setup| async move {
        let (client_id, mut rcv_out) = setup.state.accept_client();
        let _hello = rcv_out.recv().await.unwrap();
        subscribe(&setup.snd_req, client_id, vec![chan("ts", "#a")]);
        let _subs = rcv_out.recv().await.unwrap();

        setup
            .snd_req
            .send((
                client_id,
                DaemonMsg::SendMessage {
                    target: chan("ts", "#a"),
                    text: "hello".to_owned(),
                },
            ))
            .unwrap();

        match rcv_out.recv().await.unwrap() {
            ClientMsg::NewMessage {
                target,
                msg: ChanMsg::Chat(body),
            } => {
                assert_eq!(target, chan("ts", "#a"));
                assert_eq!(body.text, "hello");
                assert_eq!(body.author, ECHO_AUTHOR);
                assert!(recent(&body.ts));
            }
            other => panic!("expected NewMessage, got {:?}", other),
        }

        // The message also went upstream, to the right session.
        assert_eq!(
            *setup.links.sent.borrow(),
            vec![("ts".to_owned(), "#a".to_owned(), "hello".to_owned())]
        );
    });
}

#[test]
fn fan_out_preserves_order() {
    run_test(vec![("ts", vec!["#a"])], |setup| async move {
        let (c1, mut rcv1) = setup.state.accept_client();
        let (c2, mut rcv2) = setup.state.accept_client();
        let _ = rcv1.recv().await.unwrap();
        let _ = rcv2.recv().await.unwrap();
        subscribe(&setup.snd_req, c1, vec![chan("ts", "#a")]);
        subscribe(&setup.snd_req, c2, vec![chan("ts", "#a")]);
        let _ = rcv1.recv().await.unwrap();
        let _ = rcv2.recv().await.unwrap();

        for text in ["hi", "there"] {
            setup
                .snd_conn
                .send(ConnEv::Msg {
                    serv: "ts".to_owned(),
                    chan: ChanName::new("#a".to_owned()),
                    body: MsgBody::now(text.to_owned(), "alice".to_owned()),
                })
                .unwrap();
        }

        for rcv in [&mut rcv1, &mut rcv2] {
            for expected in ["hi", "there"] {
                match rcv.recv().await.unwrap() {
                    ClientMsg::NewMessage {
                        target,
                        msg: ChanMsg::Chat(body),
                    } => {
                        assert_eq!(target, chan("ts", "#a"));
                        assert_eq!(body.text, expected);
                        assert_eq!(body.author, "alice");
                    }
                    other => panic!("expected NewMessage, got {:?}", other),
                }
            }
        }
    });
}

#[test]
fn goodbye_stops_delivery() {
    run_test(vec![("ts", vec!["#a"])], |setup| async move {
        let (c1, mut rcv1) = setup.state.accept_client();
        let (c2, mut rcv2) = setup.state.accept_client();
        let _ = rcv1.recv().await.unwrap();
        let _ = rcv2.recv().await.unwrap();
        subscribe(&setup.snd_req, c1, vec![chan("ts", "#a")]);
        subscribe(&setup.snd_req, c2, vec![chan("ts", "#a")]);
        let _ = rcv1.recv().await.unwrap();
        let _ = rcv2.recv().await.unwrap();

        setup.snd_req.send((c1, DaemonMsg::Goodbye)).unwrap();
        yield_(5).await;

        assert!(!setup.state.has_client(c1));
        setup.state.assert_subs_consistent();

        setup
            .snd_conn
            .send(ConnEv::Msg {
                serv: "ts".to_owned(),
                chan: ChanName::new("#a".to_owned()),
                body: MsgBody::now("still here?".to_owned(), "alice".to_owned()),
            })
            .unwrap();

        // The survivor gets the message; the departed client's queue is closed.
        match rcv2.recv().await.unwrap() {
            ClientMsg::NewMessage { .. } => {}
            other => panic!("expected NewMessage, got {:?}", other),
        }
        assert_eq!(rcv1.recv().await, None);
    });
}

#[test]
fn late_subscriber_sees_history() {
    run_test(vec![("ts", vec!["#a"])], |setup| async move {
        setup
            .snd_conn
            .send(ConnEv::Msg {
                serv: "ts".to_owned(),
                chan: ChanName::new("#a".to_owned()),
                body: MsgBody::now("early bird".to_owned(), "alice".to_owned()),
            })
            .unwrap();
        yield_(5).await;

        let (c2, mut rcv2) = setup.state.accept_client();
        let _ = rcv2.recv().await.unwrap();
        subscribe(&setup.snd_req, c2, vec![chan("ts", "#a")]);

        match rcv2.recv().await.unwrap() {
            ClientMsg::Subscriptions { chans } => {
                let (_, data) = &chans[0];
                assert_eq!(data.msgs.len(), 1);
                assert_eq!(data.msgs[0].body().text, "early bird");
                assert_eq!(data.msgs[0].body().author, "alice");
            }
            other => panic!("expected Subscriptions, got {:?}", other),
        }
    });
}

#[test]
fn subscribe_is_idempotent() {
    run_test(vec![("ts", vec!["#a", "#b"])], |setup| async move {
        let (client_id, mut rcv_out) = setup.state.accept_client();
        let _ = rcv_out.recv().await.unwrap();

        subscribe(&setup.snd_req, client_id, vec![chan("ts", "#a")]);
        subscribe(
            &setup.snd_req,
            client_id,
            vec![chan("ts", "#a"), chan("ts", "#b")],
        );
        // Each Subscribe gets its own reply.
        let _ = rcv_out.recv().await.unwrap();
        let _ = rcv_out.recv().await.unwrap();

        // The subscribed set is the union of the requested sets.
        let chans = setup.state.client_chans(client_id).unwrap();
        let expected: HashSet<_> = [chan("ts", "#a"), chan("ts", "#b")].into_iter().collect();
        assert_eq!(chans, expected);
        setup.state.assert_subs_consistent();
    });
}

#[test]
fn client_ids_strictly_increase() {
    run_test(vec![("ts", vec!["#a"])], |setup| async move {
        let (c1, _rcv1) = setup.state.accept_client();
        let (c2, _rcv2) = setup.state.accept_client();
        let (c3, _rcv3) = setup.state.accept_client();
        assert_eq!((c1, c2, c3), (ClientId(1), ClientId(2), ClientId(3)));

        // Ids are not reused after a goodbye.
        setup.snd_req.send((c2, DaemonMsg::Goodbye)).unwrap();
        yield_(5).await;
        let (c4, _rcv4) = setup.state.accept_client();
        assert_eq!(c4, ClientId(4));
    });
}

#[test]
fn eager_subscribe_materializes_unknown_channels() {
    run_test(vec![("ts", vec!["#a"])], |setup| async move {
        let (client_id, mut rcv_out) = setup.state.accept_client();
        let _ = rcv_out.recv().await.unwrap();

        // Neither the channel nor the server exists yet.
        subscribe(
            &setup.snd_req,
            client_id,
            vec![chan("ts", "#new"), chan("elsewhere", "#x")],
        );

        assert_eq!(
            rcv_out.recv().await.unwrap(),
            ClientMsg::Subscriptions {
                chans: vec![
                    (chan("ts", "#new"), ChanData::default()),
                    (chan("elsewhere", "#x"), ChanData::default()),
                ],
            }
        );
        assert!(setup.state.chan_exists(&chan("ts", "#new")));
        assert!(setup.state.chan_exists(&chan("elsewhere", "#x")));
        setup.state.assert_subs_consistent();
    });
}

#[test]
fn unsubscribed_clients_get_nothing() {
    run_test(vec![("ts", vec!["#a", "#b"])], |setup| async move {
        let (c1, mut rcv1) = setup.state.accept_client();
        let _ = rcv1.recv().await.unwrap();
        subscribe(&setup.snd_req, c1, vec![chan("ts", "#b")]);
        let _ = rcv1.recv().await.unwrap();

        setup
            .snd_conn
            .send(ConnEv::Msg {
                serv: "ts".to_owned(),
                chan: ChanName::new("#a".to_owned()),
                body: MsgBody::now("psst".to_owned(), "alice".to_owned()),
            })
            .unwrap();
        yield_(5).await;

        // Nothing was enqueued for the #b-only client.
        assert!(rcv1.try_recv().is_err());
    });
}

#[test]
fn topic_updates_fan_out_and_stick() {
    run_test(vec![("ts", vec!["#a"])], |setup| async move {
        let (c1, mut rcv1) = setup.state.accept_client();
        let _ = rcv1.recv().await.unwrap();
        subscribe(&setup.snd_req, c1, vec![chan("ts", "#a")]);
        let _ = rcv1.recv().await.unwrap();

        setup
            .snd_conn
            .send(ConnEv::InitialTopic {
                serv: "ts".to_owned(),
                chan: ChanName::new("#a".to_owned()),
                topic: "welcome".to_owned(),
            })
            .unwrap();
        assert_eq!(
            rcv1.recv().await.unwrap(),
            ClientMsg::InitialTopic {
                target: chan("ts", "#a"),
                topic: "welcome".to_owned(),
            }
        );

        setup
            .snd_conn
            .send(ConnEv::Topic {
                serv: "ts".to_owned(),
                chan: ChanName::new("#a".to_owned()),
                body: MsgBody::now("new topic".to_owned(), "op".to_owned()),
            })
            .unwrap();
        match rcv1.recv().await.unwrap() {
            ClientMsg::NewTopic {
                target,
                msg: ChanMsg::Topic(body),
            } => {
                assert_eq!(target, chan("ts", "#a"));
                assert_eq!(body.text, "new topic");
            }
            other => panic!("expected NewTopic, got {:?}", other),
        }

        // A later subscriber sees the topic in its snapshot, with the change in the log.
        let (c2, mut rcv2) = setup.state.accept_client();
        let _ = rcv2.recv().await.unwrap();
        subscribe(&setup.snd_req, c2, vec![chan("ts", "#a")]);
        match rcv2.recv().await.unwrap() {
            ClientMsg::Subscriptions { chans } => {
                let (_, data) = &chans[0];
                assert_eq!(data.topic, "new topic");
                assert_eq!(data.msgs.len(), 1);
            }
            other => panic!("expected Subscriptions, got {:?}", other),
        }
    });
}

#[test]
fn connection_flags_follow_events() {
    run_test(vec![("ts", vec!["#a"])], |setup| async move {
        assert!(!setup.state.is_connected("ts"));

        setup
            .snd_conn
            .send(ConnEv::Up {
                serv: "ts".to_owned(),
            })
            .unwrap();
        yield_(5).await;
        assert!(setup.state.is_connected("ts"));

        setup
            .snd_conn
            .send(ConnEv::Down {
                serv: "ts".to_owned(),
            })
            .unwrap();
        yield_(5).await;
        assert!(!setup.state.is_connected("ts"));

        // A send while the server is down still reaches the link bundle (which drops it) and
        // still echoes locally to subscribers.
        let (c1, mut rcv1) = setup.state.accept_client();
        let _ = rcv1.recv().await.unwrap();
        subscribe(&setup.snd_req, c1, vec![chan("ts", "#a")]);
        let _ = rcv1.recv().await.unwrap();
        setup
            .snd_req
            .send((
                c1,
                DaemonMsg::SendMessage {
                    target: chan("ts", "#a"),
                    text: "anyone?".to_owned(),
                },
            ))
            .unwrap();
        match rcv1.recv().await.unwrap() {
            ClientMsg::NewMessage {
                msg: ChanMsg::Chat(body),
                ..
            } => assert_eq!(body.author, ECHO_AUTHOR),
            other => panic!("expected NewMessage, got {:?}", other),
        }
        assert_eq!(setup.links.sent.borrow().len(), 1);
    });
}

//
// One session end to end, over a real socket
//

async fn read_one(stream: &mut tokio::net::UnixStream, buf: &mut Vec<u8>) -> ClientMsg {
    let mut read_buf: [u8; 1024] = [0; 1024];
    loop {
        if let Some(msg) = libhirc_wire::parse_client_msg(buf) {
            return msg.unwrap();
        }
        let bytes = stream.read(&mut read_buf).await.unwrap();
        assert!(bytes > 0, "daemon closed the socket early");
        buf.extend_from_slice(&read_buf[0..bytes]);
    }
}

#[test]
fn socket_session_end_to_end() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let local = tokio::task::LocalSet::new();

    local.block_on(&runtime, async move {
        let socket_path =
            std::env::temp_dir().join(format!("hircd_test_{}.sock", std::process::id()));
        let listener = crate::listener::bind(&socket_path).unwrap();

        let state = SharedState::new(vec![(
            "ts".to_owned(),
            vec![ChanName::new("#a".to_owned())],
        )]);
        let (snd_req, rcv_req) = mpsc::unbounded_channel();
        let (_snd_conn, rcv_conn) = mpsc::unbounded_channel::<ConnEv>();
        let links = FakeLinks::default();

        tokio::task::spawn_local(
            Dispatcher::new(state.clone(), Rc::new(links.clone()), rcv_req, rcv_conn).run(),
        );
        tokio::task::spawn_local(crate::listener::task(listener, state.clone(), snd_req));

        let mut stream = tokio::net::UnixStream::connect(&socket_path).await.unwrap();
        let mut buf: Vec<u8> = Vec::new();

        let client_id = match read_one(&mut stream, &mut buf).await {
            ClientMsg::Hello { client_id, chans } => {
                assert_eq!(chans, vec![chan("ts", "#a")]);
                client_id
            }
            other => panic!("expected Hello, got {:?}", other),
        };
        assert_eq!(client_id, ClientId(1));

        let send = |msg: DaemonMsg| {
            libhirc_wire::encode_daemon_request(&DaemonRequest {
                source: client_id,
                msg,
            })
        };

        stream
            .write_all(&send(DaemonMsg::Subscribe {
                chans: vec![chan("ts", "#a")],
            }))
            .await
            .unwrap();
        match read_one(&mut stream, &mut buf).await {
            ClientMsg::Subscriptions { chans } => {
                assert_eq!(chans, vec![(chan("ts", "#a"), ChanData::default())]);
            }
            other => panic!("expected Subscriptions, got {:?}", other),
        }

        stream
            .write_all(&send(DaemonMsg::SendMessage {
                target: chan("ts", "#a"),
                text: "hi".to_owned(),
            }))
            .await
            .unwrap();
        match read_one(&mut stream, &mut buf).await {
            ClientMsg::NewMessage {
                target,
                msg: ChanMsg::Chat(body),
            } => {
                assert_eq!(target, chan("ts", "#a"));
                assert_eq!(body.text, "hi");
                assert_eq!(body.author, ECHO_AUTHOR);
            }
            other => panic!("expected NewMessage, got {:?}", other),
        }

        // Goodbye: the daemon closes our queue, the writer shuts the socket down.
        stream.write_all(&send(DaemonMsg::Goodbye)).await.unwrap();
        let mut read_buf = [0; 1024];
        loop {
            match stream.read(&mut read_buf).await.unwrap() {
                0 => break,
                _ => continue,
            }
        }
        assert!(!state.has_client(client_id));

        let _ = std::fs::remove_file(&socket_path);
    });
}
