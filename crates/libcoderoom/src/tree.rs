//! Flat, path-keyed workspace tree.
//!
//! Folders do not own their children. Membership is derived from path
//! prefixes, so every stored path must have each of its proper prefixes
//! stored as a [`Node::Folder`]. All mutations preserve that invariant and
//! silently ignore operations that would break it.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use std::time::SystemTime;

use coderoom_protocol::{Node, ServerMessage, TreeSnapshot};
use tracing::debug;

use crate::epoch_ms;
use crate::error::CoderoomError;

/// A validated, normalized `/`-joined path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkspacePath(String);

impl WorkspacePath {
    pub fn parse(raw: &str) -> Result<Self, CoderoomError> {
        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty() {
            return Err(CoderoomError::InvalidPath(raw.to_string()));
        }
        for segment in trimmed.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(CoderoomError::InvalidPath(raw.to_string()));
            }
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Final segment, used as the entry's display name.
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn parent(&self) -> Option<&str> {
        self.0.rsplit_once('/').map(|(parent, _)| parent)
    }

    /// True when `self` lies strictly below `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &WorkspacePath) -> bool {
        is_under(&self.0, &ancestor.0)
    }
}

impl fmt::Display for WorkspacePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_under(path: &str, ancestor: &str) -> bool {
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}

/// Change produced by a successful tree mutation, ready for broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEvent {
    Created { path: String, node: Node },
    Deleted { path: String },
    Renamed { old_path: String, new_path: String },
    ContentUpdated { path: String, content: String },
    FolderToggled { path: String, expanded: bool },
}

impl TreeEvent {
    /// Content edits are echoed to everyone but their author; structural
    /// changes go to the whole session.
    pub fn is_edit(&self) -> bool {
        matches!(self, TreeEvent::ContentUpdated { .. })
    }
}

impl From<TreeEvent> for ServerMessage {
    fn from(event: TreeEvent) -> Self {
        match event {
            TreeEvent::Created { path, node } => ServerMessage::ItemCreated { path, node },
            TreeEvent::Deleted { path } => ServerMessage::ItemDeleted { path },
            TreeEvent::Renamed { old_path, new_path } => {
                ServerMessage::ItemRenamed { old_path, new_path }
            }
            TreeEvent::ContentUpdated { path, content } => {
                ServerMessage::ContentUpdated { path, content }
            }
            TreeEvent::FolderToggled { path, expanded } => {
                ServerMessage::FolderToggled { path, expanded }
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkspaceTree {
    entries: BTreeMap<String, Node>,
}

impl WorkspaceTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// A tree holding exactly one top-level file.
    pub fn seeded(file_name: &str, content: &str) -> Self {
        let mut tree = Self::new();
        if tree.create_file(file_name, content).is_none() {
            debug!(file_name, "seed file name rejected, starting with an empty tree");
        }
        tree
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&Node> {
        let path = WorkspacePath::parse(path).ok()?;
        self.entries.get(path.as_str())
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn snapshot(&self) -> TreeSnapshot {
        self.entries.clone()
    }

    pub fn create_file(&mut self, path: &str, content: impl Into<String>) -> Option<TreeEvent> {
        let path = self.insertable(path)?;
        if self.entries.get(path.as_str()).is_some_and(Node::is_folder) {
            let removed = self.remove_descendants(path.as_str());
            debug!(path = %path, removed, "file replaces folder");
        }
        let node = Node::File {
            name: path.name().to_string(),
            content: content.into(),
            created_at_epoch_ms: epoch_ms(SystemTime::now()),
        };
        self.entries.insert(path.as_str().to_string(), node.clone());
        Some(TreeEvent::Created {
            path: path.0,
            node,
        })
    }

    pub fn create_folder(&mut self, path: &str) -> Option<TreeEvent> {
        let path = self.insertable(path)?;
        let node = Node::Folder {
            name: path.name().to_string(),
            expanded: true,
            created_at_epoch_ms: epoch_ms(SystemTime::now()),
        };
        self.entries.insert(path.as_str().to_string(), node.clone());
        Some(TreeEvent::Created {
            path: path.0,
            node,
        })
    }

    /// Replace a file's content. Edits to missing paths or folders are dropped.
    pub fn update_content(&mut self, path: &str, content: impl Into<String>) -> Option<TreeEvent> {
        let path = WorkspacePath::parse(path).ok()?;
        let Some(Node::File { content: current, .. }) = self.entries.get_mut(path.as_str()) else {
            debug!(path = %path, "edit to missing file dropped");
            return None;
        };
        let content = content.into();
        current.clone_from(&content);
        Some(TreeEvent::ContentUpdated {
            path: path.0,
            content,
        })
    }

    /// Remove an entry and, for folders, its whole subtree.
    pub fn delete(&mut self, path: &str) -> Option<TreeEvent> {
        let path = WorkspacePath::parse(path).ok()?;
        let Some(node) = self.entries.remove(path.as_str()) else {
            debug!(path = %path, "delete of missing path ignored");
            return None;
        };
        if node.is_folder() {
            self.remove_descendants(path.as_str());
        }
        Some(TreeEvent::Deleted { path: path.0 })
    }

    /// Move an entry (and its subtree) to `new_path`, replacing whatever was there.
    pub fn rename(&mut self, old_path: &str, new_path: &str) -> Option<TreeEvent> {
        let old = WorkspacePath::parse(old_path).ok()?;
        let new = WorkspacePath::parse(new_path).ok()?;
        if old == new
            || !self.entries.contains_key(old.as_str())
            || new.is_descendant_of(&old)
            || old.is_descendant_of(&new)
            || !self.parent_is_folder(&new)
        {
            debug!(old = %old, new = %new, "rename ignored");
            return None;
        }

        if self.entries.remove(new.as_str()).is_some() {
            self.remove_descendants(new.as_str());
        }

        let moved: Vec<String> = std::iter::once(old.as_str().to_string())
            .chain(self.descendant_keys(old.as_str()))
            .collect();
        for key in moved {
            let Some(mut node) = self.entries.remove(&key) else {
                continue;
            };
            let rebased = format!("{}{}", new.as_str(), &key[old.as_str().len()..]);
            if key == old.as_str() {
                set_name(&mut node, new.name());
            }
            self.entries.insert(rebased, node);
        }

        Some(TreeEvent::Renamed {
            old_path: old.0,
            new_path: new.0,
        })
    }

    pub fn toggle_folder(&mut self, path: &str) -> Option<TreeEvent> {
        let path = WorkspacePath::parse(path).ok()?;
        let Some(Node::Folder { expanded, .. }) = self.entries.get_mut(path.as_str()) else {
            return None;
        };
        *expanded = !*expanded;
        let expanded = *expanded;
        Some(TreeEvent::FolderToggled {
            path: path.0,
            expanded,
        })
    }

    /// Verify that every proper prefix of every path is a folder.
    pub fn check_invariant(&self) -> Result<(), String> {
        for path in self.entries.keys() {
            let mut prefix_end = 0;
            while let Some(offset) = path[prefix_end..].find('/') {
                let prefix = &path[..prefix_end + offset];
                match self.entries.get(prefix) {
                    Some(node) if node.is_folder() => {}
                    Some(_) => return Err(format!("{path}: ancestor {prefix} is a file")),
                    None => return Err(format!("{path}: ancestor {prefix} is missing")),
                }
                prefix_end += offset + 1;
            }
        }
        Ok(())
    }

    fn insertable(&self, raw: &str) -> Option<WorkspacePath> {
        let path = WorkspacePath::parse(raw).ok()?;
        if self.parent_is_folder(&path) {
            Some(path)
        } else {
            debug!(path = %path, "create without parent folder ignored");
            None
        }
    }

    fn parent_is_folder(&self, path: &WorkspacePath) -> bool {
        match path.parent() {
            None => true,
            Some(parent) => self.entries.get(parent).is_some_and(Node::is_folder),
        }
    }

    fn descendant_keys(&self, path: &str) -> Vec<String> {
        let prefix = format!("{path}/");
        self.entries
            .range::<str, _>((Bound::Included(prefix.as_str()), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn remove_descendants(&mut self, path: &str) -> usize {
        let keys = self.descendant_keys(path);
        for key in &keys {
            self.entries.remove(key);
        }
        keys.len()
    }
}

fn set_name(node: &mut Node, new_name: &str) {
    match node {
        Node::File { name, .. } | Node::Folder { name, .. } => {
            *name = new_name.to_string();
        }
    }
}
