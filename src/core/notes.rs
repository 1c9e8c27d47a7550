/// File-backed notes store
///
/// Notes live in `notes.json` inside the configured data directory. Every
/// mutation rewrites the file through a temporary file and a rename, so a
/// crash never leaves a half-written collection behind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{DashboardError, Result};

pub const MAX_TITLE_LEN: usize = 200;
const NOTES_FILE: &str = "notes.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Merge patch for a note; `None` leaves the field unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotePatch {
    pub title: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct NotesCollection {
    notes: Vec<Note>,
}

pub struct NotesStore {
    path: PathBuf,
    collection: RwLock<NotesCollection>,
}

fn validate_title(title: &str) -> Result<()> {
    let len = title.chars().count();
    if len == 0 || len > MAX_TITLE_LEN {
        return Err(DashboardError::InvalidArgument(format!(
            "title must be between 1 and {} characters, got {}",
            MAX_TITLE_LEN, len
        )));
    }
    Ok(())
}

impl NotesStore {
    /// Open the store in `data_dir`, creating the directory and file if needed
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join(NOTES_FILE);

        let collection = if path.exists() {
            let content = fs::read_to_string(&path)?;
            match serde_json::from_str::<NotesCollection>(&content) {
                Ok(collection) => {
                    info!(path = %path.display(), count = collection.notes.len(), "loaded notes");
                    collection
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "corrupted notes file, reinitializing");
                    let empty = NotesCollection::default();
                    write_atomic(&path, &empty)?;
                    empty
                }
            }
        } else {
            info!(path = %path.display(), "creating notes file");
            let empty = NotesCollection::default();
            write_atomic(&path, &empty)?;
            empty
        };

        Ok(Self {
            path,
            collection: RwLock::new(collection),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn list(&self) -> Vec<Note> {
        self.read().notes.clone()
    }

    pub fn get(&self, id: &str) -> Result<Note> {
        self.read()
            .notes
            .iter()
            .find(|n| n.id == id)
            .cloned()
            .ok_or_else(|| DashboardError::NotFound(format!("note {}", id)))
    }

    pub fn create(&self, title: &str, content: &str) -> Result<Note> {
        validate_title(title)?;

        let now = Utc::now();
        let note = Note {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            content: content.to_string(),
            created_at: now,
            updated_at: now,
        };

        let mut collection = self.write();
        collection.notes.push(note.clone());
        if let Err(e) = write_atomic(&self.path, &collection) {
            collection.notes.pop();
            return Err(e);
        }

        info!(id = %note.id, title = %note.title, "created note");
        Ok(note)
    }

    /// Apply a merge patch; last write wins
    pub fn update(&self, id: &str, patch: NotePatch) -> Result<Note> {
        if let Some(title) = &patch.title {
            validate_title(title)?;
        }

        let mut collection = self.write();
        let index = collection
            .notes
            .iter()
            .position(|n| n.id == id)
            .ok_or_else(|| DashboardError::NotFound(format!("note {}", id)))?;

        let previous = collection.notes[index].clone();
        {
            let note = &mut collection.notes[index];
            if let Some(title) = patch.title {
                note.title = title;
            }
            if let Some(content) = patch.content {
                note.content = content;
            }
            note.updated_at = Utc::now();
        }

        if let Err(e) = write_atomic(&self.path, &collection) {
            collection.notes[index] = previous;
            return Err(e);
        }

        let note = collection.notes[index].clone();
        info!(id = %note.id, title = %note.title, "updated note");
        Ok(note)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let mut collection = self.write();
        let index = collection
            .notes
            .iter()
            .position(|n| n.id == id)
            .ok_or_else(|| DashboardError::NotFound(format!("note {}", id)))?;

        let removed = collection.notes.remove(index);
        if let Err(e) = write_atomic(&self.path, &collection) {
            collection.notes.insert(index, removed);
            return Err(e);
        }

        info!(id = %id, "deleted note");
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, NotesCollection> {
        match self.collection.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, NotesCollection> {
        match self.collection.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Write through a sibling temp file and rename over the target
fn write_atomic(path: &Path, collection: &NotesCollection) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let content = serde_json::to_string_pretty(collection)?;

    if let Err(e) = fs::write(&tmp, content).and_then(|_| fs::rename(&tmp, path)) {
        warn!(path = %path.display(), error = %e, "failed to write notes file");
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}
