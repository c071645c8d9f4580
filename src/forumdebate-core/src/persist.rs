//! On-disk artifacts of a debate.
//!
//! Transcripts go to one append-only JSON-lines file per room and round;
//! the final results go to one pretty-printed JSON file per room.

use std::path::PathBuf;

use serde::Serialize;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::DebateError;
use crate::scoring::FinalResults;

#[derive(Serialize)]
struct TranscriptLine<'a> {
    speaker: &'a str,
    text: &'a str,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn transcript_path(&self, room_id: &str, round: &str) -> PathBuf {
        self.dir
            .join(format!("transcripts_{}_{}.jsonl", sanitize(room_id), sanitize(round)))
    }

    pub fn results_path(&self, room_id: &str) -> PathBuf {
        self.dir
            .join(format!("debate_results_{}.json", sanitize(room_id)))
    }

    pub async fn append_transcript(
        &self,
        room_id: &str,
        round: &str,
        speaker: &str,
        text: &str,
    ) -> Result<(), DebateError> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.transcript_path(room_id, round);

        let mut line = serde_json::to_vec(&TranscriptLine { speaker, text })?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        debug!(path = %path.display(), "Transcript line appended");
        Ok(())
    }

    pub async fn write_results(&self, room_id: &str, results: &FinalResults) -> Result<PathBuf, DebateError> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.results_path(room_id);
        let json = serde_json::to_vec_pretty(results)?;
        fs::write(&path, json).await?;
        Ok(path)
    }
}

/// Keep file names to a safe character set.
fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::Winner;
    use crate::state::ScoreRecord;

    #[tokio::test]
    async fn test_transcript_log_appends() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        store.append_transcript("room-7", "constructive_a", "debater_a", "First").await.unwrap();
        store.append_transcript("room-7", "constructive_a", "debater_c", "Second").await.unwrap();

        let content = std::fs::read_to_string(store.transcript_path("room-7", "constructive_a")).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["speaker"], "debater_a");
        assert_eq!(lines[1]["text"], "Second");
    }

    #[tokio::test]
    async fn test_results_written_per_room() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("nested"));
        let results = FinalResults::from_history(
            25.0,
            27.0,
            vec![ScoreRecord {
                round: "summary_a".to_string(),
                t1_score: 25,
                t2_score: 27,
                explanation: "T2 cited sources".to_string(),
            }],
        );

        let path = store.write_results("room-7", &results).await.unwrap();
        assert!(path.ends_with("debate_results_room-7.json"));

        let json: serde_json::Value = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(json["winner"], serde_json::json!(Winner::T2));
        assert_eq!(json["score_history"][0]["round"], "summary_a");
    }

    #[test]
    fn test_file_names_are_sanitized() {
        let store = ArtifactStore::new("/tmp/out");
        let path = store.transcript_path("room/../x", "final focus");
        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some("transcripts_room____x_final_focus.jsonl")
        );
    }
}
