//! FIFO command server: a named pipe that accepts one text command per
//! line, in the same syntax [`crate::commands`] parses schedule entries
//! with. Lets another process (a cron job, a web hook handler, a shell
//! script) drive the daemon without it needing its own IPC protocol.

use std::fs::{File, OpenOptions};
use std::io::Read;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

const FIFO_TOKEN: Token = Token(0);

/// Accumulates bytes read off the FIFO and yields complete lines, carrying
/// a partial line across reads the way a socket-framed reader would.
#[derive(Default)]
struct LineBreaker {
    buffer: Vec<u8>,
}

impl LineBreaker {
    fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]).trim().to_string();
            if !text.is_empty() {
                lines.push(text);
            }
        }
        lines
    }
}

fn ensure_fifo(path: &Path) -> std::io::Result<()> {
    if path.exists() {
        return Ok(());
    }
    nix::unistd::mkfifo(path, nix::sys::stat::Mode::from_bits_truncate(0o600))
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
}

/// Open `path` (creating the FIFO if it doesn't exist) and invoke
/// `on_line` for each complete command line read from it, until
/// `shutdown` is set.
///
/// A FIFO's read end sees EOF whenever the last writer closes it, which
/// happens constantly for a pipe meant to be echoed into by one-shot
/// shell commands; the read end is reopened rather than treated as a
/// fatal close.
pub fn run(path: &Path, shutdown: Arc<AtomicBool>, on_line: impl Fn(&str)) {
    if let Err(e) = ensure_fifo(path) {
        warn!("failed to create fifo at {}: {e}", path.display());
        return;
    }

    let mut poll = match Poll::new() {
        Ok(poll) => poll,
        Err(e) => {
            warn!("failed to create mio poller: {e}");
            return;
        }
    };
    let mut events = Events::with_capacity(16);
    let mut breaker = LineBreaker::default();

    while !shutdown.load(Ordering::SeqCst) {
        let file = match OpenOptions::new().read(true).custom_flags(nix::libc::O_NONBLOCK).open(path) {
            Ok(file) => file,
            Err(e) => {
                warn!("failed to open fifo {}: {e}", path.display());
                std::thread::sleep(Duration::from_secs(1));
                continue;
            }
        };
        if let Err(e) = register_and_drain(&mut poll, &mut events, file, &shutdown, &mut breaker, &on_line) {
            debug!("fifo session ended: {e}");
        }
    }
}

fn register_and_drain(
    poll: &mut Poll,
    events: &mut Events,
    mut file: File,
    shutdown: &Arc<AtomicBool>,
    breaker: &mut LineBreaker,
    on_line: &impl Fn(&str),
) -> std::io::Result<()> {
    let fd = file.as_raw_fd();
    poll.registry()
        .register(&mut SourceFd(&fd), FIFO_TOKEN, Interest::READABLE)?;

    let mut buf = [0u8; 4096];
    while !shutdown.load(Ordering::SeqCst) {
        poll.poll(events, Some(Duration::from_millis(500)))?;
        for event in events.iter() {
            if event.token() != FIFO_TOKEN {
                continue;
            }
            loop {
                match file.read(&mut buf) {
                    Ok(0) => return Ok(()),
                    Ok(n) => {
                        for line in breaker.feed(&buf[..n]) {
                            on_line(&line);
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(e) => return Err(e),
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_breaker_splits_on_newlines_and_trims() {
        let mut breaker = LineBreaker::default();
        let lines = breaker.feed(b"A1 ON\nA1 OFF\n");
        assert_eq!(lines, vec!["A1 ON", "A1 OFF"]);
    }

    #[test]
    fn line_breaker_carries_a_partial_line_across_feeds() {
        let mut breaker = LineBreaker::default();
        assert!(breaker.feed(b"A1 O").is_empty());
        let lines = breaker.feed(b"N\n");
        assert_eq!(lines, vec!["A1 ON"]);
    }

    #[test]
    fn blank_lines_are_dropped() {
        let mut breaker = LineBreaker::default();
        let lines = breaker.feed(b"\n  \nA1 ON\n");
        assert_eq!(lines, vec!["A1 ON"]);
    }
}
