use anyhow::{Context, Result};
use futures_util::stream::{self, BoxStream, StreamExt};
use log::{error, warn};
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::platforms::GatewayEventSource;
use crate::types::GatewayEvent;

type EventReader = Box<dyn AsyncBufRead + Send + Unpin>;

/// Gateway source that replays JSON-lines events (one `GatewayEvent` per line).
/// Blank lines and lines starting with `#` are skipped; malformed lines are logged
/// and skipped.
pub struct ReplaySource {
    reader: Option<EventReader>,
}

impl ReplaySource {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open replay file {}", path.display()))?;
        Ok(Self::from_reader(BufReader::new(file)))
    }

    pub fn stdin() -> Self {
        Self::from_reader(BufReader::new(tokio::io::stdin()))
    }

    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncBufRead + Send + Unpin + 'static,
    {
        Self {
            reader: Some(Box::new(reader)),
        }
    }
}

impl GatewayEventSource for ReplaySource {
    fn take_events(&mut self) -> Option<BoxStream<'static, GatewayEvent>> {
        let lines = self.reader.take()?.lines();

        let events = stream::unfold((lines, 0usize), |(mut lines, mut line_no)| async move {
            loop {
                line_no += 1;
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() || line.starts_with('#') {
                            continue;
                        }
                        match serde_json::from_str::<GatewayEvent>(line) {
                            Ok(event) => return Some((event, (lines, line_no))),
                            Err(e) => warn!("Skipping malformed event on line {}: {}", line_no, e),
                        }
                    }
                    Ok(None) => return None,
                    Err(e) => {
                        error!("Replay input failed on line {}: {}", line_no, e);
                        return None;
                    }
                }
            }
        });

        Some(events.boxed())
    }
}
