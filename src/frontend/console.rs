use std::sync::Arc;

use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use super::Frontend;
use crate::deploy::{ProgressReporter, StdoutProgress};

/// Chat id used for the local console.
pub const CONSOLE_CHAT: &str = "console";

/// Console transport: stdin lines in, replies on stdout.
pub async fn run(frontend: Arc<Frontend>, shutdown_rx: broadcast::Receiver<()>) {
    let handled = serve_lines(frontend, BufReader::new(io::stdin()), shutdown_rx).await;
    tracing::info!("console closed after {handled} command(s)");
}

/// Feed every non-empty line of `reader` to the front end until EOF,
/// `/quit` or shutdown. Returns the number of lines handled.
pub async fn serve_lines<R>(
    frontend: Arc<Frontend>,
    reader: R,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> usize
where
    R: AsyncBufRead + Unpin,
{
    let progress: Arc<dyn ProgressReporter> = Arc::new(StdoutProgress::new("deploy"));
    let mut lines = reader.lines();
    let mut handled = 0;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = shutdown_rx.recv() => break,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("console: failed to read input: {e}");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" || line == "/exit" {
            break;
        }

        let reply = frontend.handle(CONSOLE_CHAT, line, progress.clone()).await;
        if reply.success {
            println!("{}", reply.message);
        } else {
            println!("! {}", reply.message);
        }
        handled += 1;
    }
    handled
}
