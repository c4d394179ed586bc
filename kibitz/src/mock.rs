//! Scripted fake engine driving the protocol machinery in tests
//!
//! Each entry of a script is a line the driver is expected to write and the
//! lines the engine answers with. Any deviation panics inside the engine
//! task and surfaces through [`MockEngine::assert_done`].

use std::time::Duration;

use tokio::io::{split, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;

use crate::transport::Transport;

pub(crate) type Script = Vec<(&'static str, Vec<&'static str>)>;

pub(crate) struct MockEngine {
    done: oneshot::Receiver<()>,
}

/// Builds a transport talking to a scripted engine. With `close_when_done`
/// the engine hangs up after the script, simulating process exit with
/// `exit_code`; otherwise it stays alive and panics on any extra line.
pub(crate) fn mock_engine(
    script: Script,
    exit_code: Option<i32>,
    close_when_done: bool,
) -> (Transport, MockEngine) {
    let (client, server) = tokio::io::duplex(16 * 1024);
    let (client_read, client_write) = split(client);
    let transport = Transport::mock(client_read, client_write, exit_code);

    let (done_tx, done) = oneshot::channel();
    tokio::spawn(async move {
        let (server_read, mut server_write) = split(server);
        let mut lines = BufReader::new(server_read).lines();

        for (expect, responses) in script {
            let line = lines
                .next_line()
                .await
                .expect("mock engine failed to read")
                .expect("driver hung up before the script finished");
            assert_eq!(line, expect, "mock engine got an unexpected line");
            for response in responses {
                server_write.write_all(response.as_bytes()).await.unwrap();
                server_write.write_all(b"\n").await.unwrap();
            }
        }
        let _ = done_tx.send(());

        if close_when_done {
            // Returning drops both halves of the stream; the driver reads
            // whatever is still buffered and then sees the hangup.
            return;
        }
        drop(server_write);
        while let Ok(Some(line)) = lines.next_line().await {
            panic!("mock engine got an unexpected line after the script: {line}");
        }
    });

    (transport, MockEngine { done })
}

impl MockEngine {
    /// Asserts that the driver produced the whole expected line sequence
    pub(crate) async fn assert_done(self) {
        tokio::time::timeout(Duration::from_secs(5), self.done)
            .await
            .expect("mock engine script not consumed in time")
            .expect("mock engine failed");
    }
}
