//! Automated-mode output: one JSON object per message.

use std::io::Write;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::error;

use crate::message::{Message, MessageSink};

/// Message sink writing JSON lines.
///
/// Each message becomes one line, tagged by its `type` field:
///
/// ```text
/// {"type":"test_finished","test":{"unique_id":"calc::add",...},"outcome":"passed",...}
/// ```
///
/// Refuses further messages once the writer fails.
pub struct JsonSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonSink {
    pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
        }
    }

    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }

    fn write_line(&self, message: &Message) -> anyhow::Result<()> {
        let line = serde_json::to_string(message)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("JSON writer lock poisoned"))?;
        writeln!(writer, "{}", line)?;
        writer.flush()?;
        Ok(())
    }
}

#[async_trait]
impl MessageSink for JsonSink {
    async fn on_message(&self, message: &Message) -> bool {
        match self.write_line(message) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to write JSON message: {:#}", e);
                false
            }
        }
    }
}
