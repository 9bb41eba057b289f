use serde::Serialize;
use std::path::Path;
use tokio::sync::mpsc;

use crate::platform::Platform;

/// Caller-facing event stream for one fetch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum FetchEvent {
    Started {
        platform: Platform,
        manifest_id: String,
    },
    /// A line of SteamCMD output worth showing to a human.
    Output(String),
    /// SteamCMD self-update progress, 0..=100.
    Progress(u8),
    GuardCodeRequested {
        attempt: u32,
    },
    DownloadPath(String),
    Ingesting {
        from: String,
        to: String,
    },
    Finished {
        path: String,
    },
    Error(String),
}

/// Where fetch events go. Every event is mirrored to the log as well.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<FetchEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<FetchEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Log-only sink.
    pub fn silent() -> Self {
        Self { tx: None }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<FetchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: FetchEvent) {
        match &event {
            FetchEvent::Output(s) => {
                let preview = if s.len() > 500 {
                    let mut end = 500;
                    while !s.is_char_boundary(end) {
                        end -= 1;
                    }
                    format!("{}…", &s[..end])
                } else {
                    s.clone()
                };
                log::info!("steamcmd: {}", preview.replace('\n', "\\n"));
            }
            FetchEvent::Progress(pct) => log::debug!("steamcmd progress: {pct}%"),
            FetchEvent::GuardCodeRequested { attempt } => {
                log::info!("Steam Guard code requested (attempt {attempt})")
            }
            FetchEvent::Error(e) => log::error!("fetch error: {e}"),
            _ => log::debug!("fetch event: {event:?}"),
        }
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub(crate) fn path_string(path: &Path) -> String {
        path.to_string_lossy().to_string()
    }
}
