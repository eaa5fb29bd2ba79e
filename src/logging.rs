use tokio::sync::broadcast;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Initialize tracing once: formatted lines go to stdout and are teed into
/// a broadcast channel so the WebSocket stream can relay them to admin
/// clients. `RUST_LOG` overrides the default `info` filter.
pub fn init() -> broadcast::Sender<String> {
    let (tx, _) = broadcast::channel(512);
    let writer = TeeMakeWriter { sender: tx.clone() };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(writer)
        .init();

    tx
}

#[derive(Clone)]
struct TeeMakeWriter {
    sender: broadcast::Sender<String>,
}

impl<'a> MakeWriter<'a> for TeeMakeWriter {
    type Writer = TeeWriter;

    fn make_writer(&'a self) -> Self::Writer {
        TeeWriter {
            sender: self.sender.clone(),
        }
    }
}

struct TeeWriter {
    sender: broadcast::Sender<String>,
}

impl std::io::Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let line = String::from_utf8_lossy(buf).to_string();
        let _ = self.sender.send(line); // ignored when nobody listens
        std::io::stdout().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stdout().flush()
    }
}
