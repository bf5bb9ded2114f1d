//! Broadcast + history transcript store.

use std::{collections::VecDeque, sync::RwLock};

use futures::{StreamExt, future};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{RunMsg, RunStatus};

/// History size limit (4 MB). A CI build log fits comfortably; anything
/// larger is still streamed live, only the retained history is capped.
const HISTORY_BYTES: usize = 4 * 1024 * 1024;

#[derive(Clone)]
struct StoredMsg {
    msg: RunMsg,
    bytes: usize,
}

struct Inner {
    history: VecDeque<StoredMsg>,
    total_bytes: usize,
}

/// Transcript store with broadcast and history support.
///
/// Subscribers that attach mid-run receive the history first, then switch
/// seamlessly to live updates, so no line is shown twice or dropped.
pub struct TranscriptStore {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<RunMsg>,
}

impl Default for TranscriptStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptStore {
    /// Create a new transcript store.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(10000);
        Self {
            inner: RwLock::new(Inner {
                history: VecDeque::with_capacity(32),
                total_bytes: 0,
            }),
            sender,
        }
    }

    /// Push a message to both live listeners and history.
    pub fn push(&self, msg: RunMsg) {
        let _ = self.sender.send(msg.clone()); // live listeners
        let bytes = msg.approx_bytes();

        let mut inner = self.inner.write().unwrap();
        while inner.total_bytes.saturating_add(bytes) > HISTORY_BYTES {
            if let Some(front) = inner.history.pop_front() {
                inner.total_bytes = inner.total_bytes.saturating_sub(front.bytes);
            } else {
                break;
            }
        }
        inner.history.push_back(StoredMsg { msg, bytes });
        inner.total_bytes = inner.total_bytes.saturating_add(bytes);
    }

    /// Push a log line.
    pub fn push_line<S: Into<String>>(&self, text: S) {
        self.push(RunMsg::Line { text: text.into() });
    }

    /// Push a lifecycle transition.
    pub fn push_status(&self, status: RunStatus) {
        self.push(RunMsg::Status { status });
    }

    /// Push the final result code.
    pub fn push_result(&self, code: i32) {
        self.push(RunMsg::Result { code });
    }

    /// Push finished notification.
    pub fn push_finished(&self) {
        self.push(RunMsg::Finished);
    }

    /// Get a receiver for live updates.
    #[must_use]
    pub fn get_receiver(&self) -> broadcast::Receiver<RunMsg> {
        self.sender.subscribe()
    }

    /// Get a snapshot of the history.
    #[must_use]
    pub fn get_history(&self) -> Vec<RunMsg> {
        self.inner
            .read()
            .unwrap()
            .history
            .iter()
            .map(|s| s.msg.clone())
            .collect()
    }

    /// Stream that yields history first, then live updates.
    #[must_use]
    pub fn history_plus_stream(
        &self,
    ) -> futures::stream::BoxStream<'static, Result<RunMsg, std::io::Error>> {
        let (history, rx) = (self.get_history(), self.get_receiver());

        let hist = futures::stream::iter(history.into_iter().map(Ok::<_, std::io::Error>));
        let live = BroadcastStream::new(rx)
            .filter_map(|res: Result<RunMsg, _>| async move { res.ok().map(Ok::<_, std::io::Error>) });

        Box::pin(hist.chain(live))
    }

    /// Stream of log lines (until Finished).
    #[must_use]
    pub fn line_stream(
        &self,
    ) -> futures::stream::BoxStream<'static, Result<String, std::io::Error>> {
        self.history_plus_stream()
            .take_while(|res| future::ready(!matches!(res, Ok(RunMsg::Finished))))
            .filter_map(|res| async move {
                match res {
                    Ok(RunMsg::Line { text }) => Some(Ok(text)),
                    _ => None,
                }
            })
            .boxed()
    }
}
