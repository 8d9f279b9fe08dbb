//! The terminal view: one buffer per subscribed channel, a tab strip to switch between them and a
//! single-line input. The app itself is thin: all state of record lives in the daemon, this is
//! a rendering of what arrives on the socket.

use color_eyre::Result;
use crossterm::event::{self, Event as CrosstermEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use libhirc_common::{ChanId, ChanMsg, ClientId};
use libhirc_wire::{encode_daemon_request, ClientMsg, DaemonMsg, DaemonRequest};
use ratatui::{prelude::*, widgets::*, DefaultTerminal};

use std::collections::HashMap;

use tokio::io::AsyncWriteExt;
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::mpsc;

#[derive(Default)]
struct ChanBuf {
    topic: String,
    msgs: Vec<ChanMsg>,
}

pub(crate) struct App {
    rcv_msg: mpsc::Receiver<ClientMsg>,
    write_half: OwnedWriteHalf,

    /// Our id, learned from the daemon's Hello.
    client_id: Option<ClientId>,

    /// Channels in display order, set by the Subscriptions reply.
    chans: Vec<ChanId>,
    bufs: HashMap<ChanId, ChanBuf>,

    /// Index into `chans` of the channel on screen.
    current: usize,

    input: String,
    should_quit: bool,
}

impl App {
    pub(crate) fn new(rcv_msg: mpsc::Receiver<ClientMsg>, write_half: OwnedWriteHalf) -> App {
        App {
            rcv_msg,
            write_half,
            client_id: None,
            chans: Vec::new(),
            bufs: HashMap::new(),
            current: 0,
            input: String::new(),
            should_quit: false,
        }
    }

    pub(crate) async fn run(mut self, mut terminal: DefaultTerminal) -> Result<()> {
        while !self.should_quit {
            loop {
                match self.rcv_msg.try_recv() {
                    Ok(msg) => self.handle_client_msg(msg).await?,
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        // Daemon gone; nothing left to render.
                        return Ok(());
                    }
                }
            }

            terminal.draw(|f| self.draw_ui(f))?;

            if event::poll(std::time::Duration::from_millis(50))? {
                if let CrosstermEvent::Key(key_event) = event::read()? {
                    self.handle_key_event(key_event).await?;
                }
            }
        }
        Ok(())
    }

    async fn handle_client_msg(&mut self, msg: ClientMsg) -> Result<()> {
        match msg {
            ClientMsg::Hello { client_id, chans } => {
                self.client_id = Some(client_id);
                // Subscribe to everything the daemon knows about.
                self.send(DaemonMsg::Subscribe { chans }).await?;
            }
            ClientMsg::Subscriptions { chans } => {
                self.chans = chans.iter().map(|(chan, _)| chan.clone()).collect();
                self.bufs = chans
                    .into_iter()
                    .map(|(chan, data)| {
                        (
                            chan,
                            ChanBuf {
                                topic: data.topic,
                                msgs: data.msgs,
                            },
                        )
                    })
                    .collect();
                self.current = 0;
            }
            ClientMsg::NewMessage { target, msg } => {
                self.buf_mut(&target).msgs.push(msg);
            }
            ClientMsg::NewTopic { target, msg } => {
                let buf = self.buf_mut(&target);
                buf.topic = msg.body().text.clone();
                buf.msgs.push(msg);
            }
            ClientMsg::InitialTopic { target, topic } => {
                self.buf_mut(&target).topic = topic;
            }
        }
        Ok(())
    }

    /// The buffer for a channel, created on first sight. Channels we never subscribed to can
    /// still show up here if the daemon learns about them after our Hello.
    fn buf_mut(&mut self, target: &ChanId) -> &mut ChanBuf {
        if !self.bufs.contains_key(target) {
            self.chans.push(target.clone());
        }
        self.bufs.entry(target.clone()).or_default()
    }

    async fn handle_key_event(&mut self, key_event: KeyEvent) -> Result<()> {
        if key_event.kind != KeyEventKind::Press {
            return Ok(());
        }

        if key_event.modifiers.contains(KeyModifiers::CONTROL) {
            if let KeyCode::Char('q') = key_event.code {
                self.send(DaemonMsg::Goodbye).await?;
                self.should_quit = true;
            }
            return Ok(());
        }

        match key_event.code {
            KeyCode::Tab => {
                if !self.chans.is_empty() {
                    self.current = (self.current + 1) % self.chans.len();
                }
            }
            KeyCode::BackTab => {
                if !self.chans.is_empty() {
                    self.current = (self.current + self.chans.len() - 1) % self.chans.len();
                }
            }
            KeyCode::Char(c) => {
                self.input.push(c);
            }
            KeyCode::Backspace => {
                self.input.pop();
            }
            KeyCode::Enter => {
                if !self.input.is_empty() {
                    if let Some(target) = self.chans.get(self.current).cloned() {
                        let text = std::mem::take(&mut self.input);
                        self.send(DaemonMsg::SendMessage { target, text }).await?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn send(&mut self, msg: DaemonMsg) -> Result<()> {
        let req = DaemonRequest {
            source: self.client_id.unwrap_or(ClientId(0)),
            msg,
        };
        self.write_half.write_all(&encode_daemon_request(&req)).await?;
        Ok(())
    }

    fn draw_ui(&self, f: &mut Frame) {
        let layout = Layout::vertical([
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(f.area());

        self.draw_tabs(f, layout[0]);
        self.draw_msgs(f, layout[1]);
        self.draw_input(f, layout[2]);
    }

    fn draw_tabs(&self, f: &mut Frame, area: Rect) {
        let titles: Vec<String> = self.chans.iter().map(|chan| chan.to_string()).collect();
        let tabs = Tabs::new(titles)
            .select(self.current)
            .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
        f.render_widget(tabs, area);
    }

    fn draw_msgs(&self, f: &mut Frame, area: Rect) {
        let (title, msgs) = match self.chans.get(self.current) {
            None => ("hirc (waiting for channels)".to_owned(), &[][..]),
            Some(chan) => {
                let buf = &self.bufs[chan];
                let title = if buf.topic.is_empty() {
                    chan.to_string()
                } else {
                    format!("{} | {}", chan, buf.topic)
                };
                (title, buf.msgs.as_slice())
            }
        };

        // Show the tail that fits.
        let visible = (area.height as usize).saturating_sub(2);
        let start = msgs.len().saturating_sub(visible);
        let items: Vec<ListItem> = msgs[start..]
            .iter()
            .map(|msg| {
                let body = msg.body();
                let ts = body.ts.format("%H:%M");
                let line = match msg {
                    ChanMsg::Chat(_) => format!("{} {}: {}", ts, body.author, body.text),
                    ChanMsg::Topic(_) => {
                        format!("{} {} changed the topic to: {}", ts, body.author, body.text)
                    }
                };
                ListItem::new(Text::raw(line))
            })
            .collect();

        let list = List::new(items).block(Block::default().borders(Borders::ALL).title(title));
        f.render_widget(list, area);
    }

    fn draw_input(&self, f: &mut Frame, area: Rect) {
        let input = Paragraph::new(self.input.as_str()).block(
            Block::default()
                .borders(Borders::ALL)
                .title("Message (Enter to send, Ctrl-Q to quit)"),
        );
        f.render_widget(input, area);
        f.set_cursor_position(Position::new(
            area.x + 1 + self.input.chars().count() as u16,
            area.y + 1,
        ));
    }
}
