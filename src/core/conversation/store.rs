use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::core::conversation::state::ConversationState;

/// JSON snapshot persistence for conversation state.
///
/// One file per conversation, replaced atomically via tmp+rename so a crash
/// mid-write never corrupts the last good snapshot. Restart-resume loads the
/// snapshot and relaunches the driver; no call stack survives, none is
/// needed.
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, conversation_id: &str) -> PathBuf {
        self.dir.join(format!("{conversation_id}.json"))
    }

    pub async fn save(&self, state: &ConversationState) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&state.conversation_id);
        let tmp = path.with_extension("json.tmp");
        let payload = serde_json::to_vec_pretty(state)?;
        tokio::fs::write(&tmp, payload).await?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("replacing snapshot {path:?}"))
    }

    pub async fn load(&self, conversation_id: &str) -> Result<Option<ConversationState>> {
        let path = self.path_for(conversation_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let state = serde_json::from_slice(&bytes)
                    .with_context(|| format!("parsing snapshot {path:?}"))?;
                Ok(Some(state))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete(&self, conversation_id: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(conversation_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(id) = name.strip_suffix(".json") {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::GoalCatalog;

    #[tokio::test]
    async fn snapshot_round_trips_and_lists() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path().to_path_buf());

        let goal = GoalCatalog::builtin().first().unwrap().clone();
        let mut state = ConversationState::new(goal, 24);
        state.generation = 3;

        store.save(&state).await.unwrap();
        let loaded = store.load(&state.conversation_id).await.unwrap().unwrap();
        assert_eq!(loaded.generation, 3);
        assert_eq!(loaded.goal.id, "billing");

        assert_eq!(store.list().await.unwrap(), vec![state.conversation_id.clone()]);

        store.delete(&state.conversation_id).await.unwrap();
        assert!(store.load(&state.conversation_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn loading_an_unknown_conversation_is_none_not_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path().to_path_buf());
        assert!(store.load("missing").await.unwrap().is_none());
    }
}
