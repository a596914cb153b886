//! Stream plumbing shared by the server and client binaries
//!
//! The lockstep core only sees decoded messages. These helpers move bytes
//! between a reliable, ordered stream and the single session loop, and apply
//! the simulated impairment knobs on the way out.

use crate::config::ImpairmentConfig;
use crate::protocol::{FrameDecoder, Message};
use crate::TickInput;
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};

/// Spawns the task that writes queued frames to `writer`.
///
/// Every frame gets a due time of `now + delay + jitter`, never earlier than
/// the previous frame's, so impairment adds latency without reordering. A
/// "dropped" frame costs one extra delay period, which is how loss looks on a
/// retransmitting stream. The task ends when the sender side is dropped or
/// the stream fails.
pub fn spawn_writer<W>(
    mut writer: W,
    mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
    impairment: ImpairmentConfig,
    label: String,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (due_tx, mut due_rx) = mpsc::unbounded_channel::<(Instant, Vec<u8>, bool)>();

    // Stamp frames as soon as they are queued so latency overlaps
    tokio::spawn(async move {
        let mut rng = StdRng::from_entropy();
        let mut last_due = Instant::now();

        while let Some(frame) = frames.recv().await {
            let mut delay_ms = impairment.delay_ms;
            if impairment.jitter_ms > 0 {
                delay_ms += rng.gen_range(0..=impairment.jitter_ms);
            }
            if impairment.drop_percent > 0 && rng.gen_range(0..100u8) < impairment.drop_percent {
                delay_ms += impairment.delay_ms.max(1);
            }
            let duplicate = impairment.duplication_percent > 0
                && rng.gen_range(0..100u8) < impairment.duplication_percent;

            let due = (Instant::now() + Duration::from_millis(delay_ms)).max(last_due);
            last_due = due;

            if due_tx.send((due, frame, duplicate)).is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        while let Some((due, frame, duplicate)) = due_rx.recv().await {
            sleep_until(due).await;

            if let Err(e) = writer.write_all(&frame).await {
                warn!("{} write failed: {}", label, e);
                break;
            }
            if duplicate {
                debug!("{} duplicating {} byte frame", label, frame.len());
                if let Err(e) = writer.write_all(&frame).await {
                    warn!("{} write failed: {}", label, e);
                    break;
                }
            }
        }

        let _ = writer.shutdown().await;
    })
}

/// Reads `reader` until EOF, handing every decoded message to `on_message`.
///
/// Malformed messages are logged and skipped. Returning `false` from
/// `on_message` stops reading.
pub async fn read_messages<R, I, F>(mut reader: R, label: &str, mut on_message: F) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    I: TickInput,
    F: FnMut(Message<I>) -> bool,
{
    let mut decoder = FrameDecoder::<I>::new();
    let mut buffer = [0u8; 2048];

    loop {
        let len = reader.read(&mut buffer).await?;
        if len == 0 {
            return Ok(());
        }

        decoder.extend(&buffer[..len]);
        while let Some(result) = decoder.next_message() {
            match result {
                Ok(message) => {
                    if !on_message(message) {
                        return Ok(());
                    }
                }
                Err(e) => warn!("{} dropped malformed message: {}", label, e),
            }
        }
    }
}
