//! Per-round speech collection.

use tracing::{debug, warn};

use crate::error::DebateError;
use crate::persist::ArtifactStore;
use crate::state::truncate_utterance;
use crate::store::TranscriptWriter;

pub struct TranscriptCollector {
    room_id: String,
    writer: TranscriptWriter,
    artifacts: ArtifactStore,
}

impl TranscriptCollector {
    pub fn new(room_id: impl Into<String>, writer: TranscriptWriter, artifacts: ArtifactStore) -> Self {
        Self {
            room_id: room_id.into(),
            writer,
            artifacts,
        }
    }

    /// Record one utterance under the current round.
    ///
    /// Text is cut to the utterance limit before it is stored. Speech that
    /// arrives after the last round is dropped and `None` is returned.
    /// A failed disk write is logged; the in-memory transcript still counts.
    pub async fn receive_transcript(&self, speaker: &str, text: &str) -> Result<Option<String>, DebateError> {
        let text = truncate_utterance(text);
        let Some(round) = self.writer.append(speaker, text.clone()).await? else {
            debug!(speaker, "Dropping transcript received after the last round");
            return Ok(None);
        };

        if let Err(e) = self
            .artifacts
            .append_transcript(&self.room_id, &round, speaker, &text)
            .await
        {
            warn!(room = %self.room_id, round = %round, error = %e, "Failed to save transcript");
        }
        debug!(speaker, round = %round, chars = text.chars().count(), "Transcript recorded");
        Ok(Some(round))
    }
}
