mod app;

use app::App;

use color_eyre::eyre::WrapErr;
use color_eyre::Result;

use std::path::PathBuf;

use tokio::io::AsyncReadExt;
use tokio::net::unix::OwnedReadHalf;
use tokio::net::UnixStream;
use tokio::sync::mpsc;

fn main() -> Result<()> {
    color_eyre::install()?;

    let socket_path = parse_args();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = tokio::task::LocalSet::new();

    local.block_on(&runtime, async move {
        let stream = UnixStream::connect(&socket_path)
            .await
            .wrap_err_with(|| format!("can't connect to hircd at {}", socket_path.display()))?;
        let (read_half, write_half) = stream.into_split();

        // Envelopes from the daemon, decoded off the socket by a separate task.
        let (snd_msg, rcv_msg) = mpsc::channel(100);
        tokio::task::spawn_local(reader_task(read_half, snd_msg));

        let terminal = ratatui::init();
        let result = App::new(rcv_msg, write_half).run(terminal).await;
        ratatui::restore();
        result
    })
}

/// `hirc [socket]`, plus `-h`/`-V`. The default socket is where hircd puts it by default.
fn parse_args() -> PathBuf {
    let mut socket_path: Option<PathBuf> = None;

    for arg in std::env::args().skip(1) {
        if arg == "-V" || arg == "--version" {
            println!("hirc {}", env!("CARGO_PKG_VERSION"));
            std::process::exit(0);
        }
        if arg == "-h" || arg == "--help" {
            println!(
                "\
{}

USAGE:
    hirc [socket]

ARGS:
    <socket>    Path of the hircd socket to connect to

OPTIONS:
    -h, --help       Print help information
    -V, --version    Print version information",
                env!("CARGO_PKG_DESCRIPTION")
            );
            std::process::exit(0);
        }
        if arg.starts_with('-') {
            eprintln!("Error: Found argument '{arg}' which wasn't expected");
            std::process::exit(1);
        }
        socket_path = Some(arg.into());
    }

    socket_path.unwrap_or_else(default_socket_path)
}

fn default_socket_path() -> PathBuf {
    let mut socket_path = dirs::data_dir().expect(
        "Can't determine the data directory, please consider setting $XDG_DATA_HOME or $HOME",
    );
    socket_path.push("hirc");
    socket_path.push("hircd.sock");
    socket_path
}

async fn reader_task(mut read_half: OwnedReadHalf, snd_msg: mpsc::Sender<libhirc_wire::ClientMsg>) {
    let mut parse_buf: Vec<u8> = Vec::with_capacity(1024);
    let mut read_buf: [u8; 1024] = [0; 1024];

    loop {
        match read_half.read(&mut read_buf).await {
            Err(_) | Ok(0) => {
                // Dropping the sender tells the app the daemon is gone.
                return;
            }
            Ok(bytes) => {
                parse_buf.extend_from_slice(&read_buf[0..bytes]);
                while let Some(msg) = libhirc_wire::parse_client_msg(&mut parse_buf) {
                    match msg {
                        Err(_) => return,
                        Ok(msg) => {
                            if snd_msg.send(msg).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }
}
