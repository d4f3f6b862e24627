// src/boards.rs - board-id to model database for `guess`

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// JSON object of board-id -> model label, e.g.
/// `{"Mac-27AD2F918AE68F61": "MacPro7,1"}`. Iterates in board-id order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoardDatabase {
    boards: BTreeMap<String, String>,
}

impl BoardDatabase {
    pub fn from_json(path: &Path, text: &str) -> Result<Self> {
        let db: Self = serde_json::from_str(text).map_err(|source| Error::BoardDatabase {
            path: path.to_path_buf(),
            source,
        })?;
        if db.boards.is_empty() {
            return Err(Error::EmptyBoardDatabase(path.to_path_buf()));
        }
        Ok(db)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(path, &text)
    }

    pub fn len(&self) -> usize {
        self.boards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boards.is_empty()
    }

    pub fn model(&self, board_id: &str) -> Option<&str> {
        self.boards.get(board_id).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.boards.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for BoardDatabase {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            boards: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}
