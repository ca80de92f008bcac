use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Client id used in change records for edits made through this server.
pub const LOCAL_CLIENT: i64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Add,
    Remove,
    Reorder,
    Update,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub client_id: i64,
    pub item_id: String,
    pub change_type: ChangeType,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListItem {
    pub item_id: String,
    pub position: usize,
    pub last_changed: DateTime<Utc>,
    #[serde(default)]
    pub change_history: Vec<ChangeRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
}

impl Permission {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "read" => Some(Permission::Read),
            "write" => Some(Permission::Write),
            _ => None,
        }
    }

    /// Write implies read.
    pub fn allows(&self, wanted: Permission) -> bool {
        *self >= wanted
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListCollaborator {
    pub user_id: i64,
    pub permission: Permission,
    pub shared_at: DateTime<Utc>,
    pub shared_by: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncClientState {
    pub client_id: i64,
    pub client_list_id: String,
    pub last_synced: DateTime<Utc>,
    /// External item ids pushed to the client on the last sync.
    #[serde(default)]
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListData {
    #[serde(default)]
    pub items: Vec<ListItem>,
    #[serde(default)]
    pub owner_id: i64,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub shared_with: Vec<ListCollaborator>,
    #[serde(default)]
    pub sync_states: Vec<SyncClientState>,
    #[serde(default)]
    pub change_history: Vec<ChangeRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_by: i64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ListError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    PermissionDenied(String),
}

impl ListData {
    pub fn owned_by(owner_id: i64) -> Self {
        Self {
            owner_id,
            ..Default::default()
        }
    }

    /// Builds a list from an ordered id sequence, as reported by a client.
    pub fn from_item_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let now = Utc::now();
        let items = ids
            .into_iter()
            .enumerate()
            .map(|(position, id)| ListItem {
                item_id: id.into(),
                position,
                last_changed: now,
                change_history: Vec::new(),
            })
            .collect();
        Self {
            items,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.items.iter().any(|i| i.item_id == item_id)
    }

    /// Item ids in position order.
    pub fn item_ids(&self) -> Vec<String> {
        let mut items: Vec<&ListItem> = self.items.iter().collect();
        items.sort_by_key(|i| i.position);
        items.into_iter().map(|i| i.item_id.clone()).collect()
    }

    /// absent -> present
    pub fn add_item(&mut self, item_id: &str, client_id: i64) -> Result<(), ListError> {
        if item_id.is_empty() {
            return Err(ListError::InvalidArgument("item id must not be empty".to_string()));
        }
        if self.contains(item_id) {
            return Err(ListError::InvalidArgument(format!(
                "item {} is already in the list",
                item_id
            )));
        }
        self.normalize_positions();
        let now = Utc::now();
        let record = self.record(client_id, item_id, ChangeType::Add, now);
        self.items.push(ListItem {
            item_id: item_id.to_string(),
            position: self.items.len(),
            last_changed: now,
            change_history: vec![record],
        });
        Ok(())
    }

    /// present -> absent
    pub fn remove_item(&mut self, item_id: &str, client_id: i64) -> Result<(), ListError> {
        let idx = self
            .items
            .iter()
            .position(|i| i.item_id == item_id)
            .ok_or_else(|| ListError::NotFound(format!("item {} is not in the list", item_id)))?;
        self.items.remove(idx);
        self.normalize_positions();
        self.record(client_id, item_id, ChangeType::Remove, Utc::now());
        Ok(())
    }

    /// present -> present; `ids` must be a permutation of the current items.
    pub fn reorder(&mut self, ids: &[String], client_id: i64) -> Result<(), ListError> {
        let current: HashSet<&str> = self.items.iter().map(|i| i.item_id.as_str()).collect();
        let wanted: HashSet<&str> = ids.iter().map(|s| s.as_str()).collect();
        if ids.len() != self.items.len() || wanted.len() != ids.len() || current != wanted {
            return Err(ListError::InvalidArgument(
                "reorder operation must include all playlist items".to_string(),
            ));
        }

        let now = Utc::now();
        let mut reordered = Vec::with_capacity(ids.len());
        for (position, id) in ids.iter().enumerate() {
            if let Some(idx) = self.items.iter().position(|i| &i.item_id == id) {
                let mut item = self.items.swap_remove(idx);
                if item.position != position {
                    item.position = position;
                    item.last_changed = now;
                    item.change_history.push(ChangeRecord {
                        client_id,
                        item_id: id.clone(),
                        change_type: ChangeType::Reorder,
                        timestamp: now,
                    });
                }
                reordered.push(item);
            }
        }
        self.items = reordered;
        self.record(client_id, "", ChangeType::Reorder, now);
        Ok(())
    }

    /// Moves one item; positions past the end clamp to the last slot.
    pub fn move_item(&mut self, item_id: &str, new_position: usize, client_id: i64) -> Result<(), ListError> {
        self.normalize_positions();
        let idx = self
            .items
            .iter()
            .position(|i| i.item_id == item_id)
            .ok_or_else(|| ListError::NotFound(format!("item {} is not in the list", item_id)))?;
        let target = new_position.min(self.items.len() - 1);
        let now = Utc::now();
        let mut item = self.items.remove(idx);
        item.last_changed = now;
        item.change_history.push(ChangeRecord {
            client_id,
            item_id: item_id.to_string(),
            change_type: ChangeType::Update,
            timestamp: now,
        });
        self.items.insert(target, item);
        for (position, item) in self.items.iter_mut().enumerate() {
            item.position = position;
        }
        self.record(client_id, item_id, ChangeType::Update, now);
        Ok(())
    }

    /// Makes positions dense, zero based and unique, keeping relative order.
    pub fn normalize_positions(&mut self) {
        self.items.sort_by_key(|i| i.position);
        for (position, item) in self.items.iter_mut().enumerate() {
            item.position = position;
        }
    }

    fn record(&mut self, client_id: i64, item_id: &str, change_type: ChangeType, at: DateTime<Utc>) -> ChangeRecord {
        let record = ChangeRecord {
            client_id,
            item_id: item_id.to_string(),
            change_type,
            timestamp: at,
        };
        self.change_history.push(record.clone());
        self.last_modified = Some(at);
        self.modified_by = client_id;
        record
    }

    /// Stamps a change made by a client outside of the state machine.
    pub fn stamp(&mut self, client_id: i64, item_id: &str, change_type: ChangeType) {
        self.record(client_id, item_id, change_type, Utc::now());
    }

    /// True if `item_id` was removed by this server after `since`.
    pub fn removed_locally_since(&self, item_id: &str, since: DateTime<Utc>) -> bool {
        self.change_history.iter().any(|r| {
            r.change_type == ChangeType::Remove
                && r.client_id == LOCAL_CLIENT
                && r.item_id == item_id
                && r.timestamp > since
        })
    }

    pub fn is_owner(&self, user_id: i64) -> bool {
        self.owner_id == user_id
    }

    pub fn permission_for(&self, user_id: i64) -> Option<Permission> {
        if self.is_owner(user_id) {
            return Some(Permission::Write);
        }
        let shared = self
            .shared_with
            .iter()
            .find(|c| c.user_id == user_id)
            .map(|c| c.permission);
        match shared {
            Some(p) => Some(p),
            None if self.is_public => Some(Permission::Read),
            None => None,
        }
    }

    pub fn can_read(&self, user_id: i64) -> bool {
        self.permission_for(user_id)
            .map(|p| p.allows(Permission::Read))
            .unwrap_or(false)
    }

    pub fn can_write(&self, user_id: i64) -> bool {
        self.permission_for(user_id)
            .map(|p| p.allows(Permission::Write))
            .unwrap_or(false)
    }

    /// Adds or updates a collaborator. Only the owner may share.
    pub fn share(&mut self, acting_user: i64, user_id: i64, permission: Permission) -> Result<(), ListError> {
        if !self.is_owner(acting_user) {
            return Err(ListError::PermissionDenied(
                "only the list owner can share the list".to_string(),
            ));
        }
        if user_id == self.owner_id {
            return Err(ListError::InvalidArgument(
                "cannot share a list with its owner".to_string(),
            ));
        }
        let now = Utc::now();
        if let Some(c) = self.shared_with.iter_mut().find(|c| c.user_id == user_id) {
            c.permission = permission;
            c.shared_at = now;
            c.shared_by = acting_user;
        } else {
            self.shared_with.push(ListCollaborator {
                user_id,
                permission,
                shared_at: now,
                shared_by: acting_user,
            });
        }
        Ok(())
    }

    pub fn unshare(&mut self, acting_user: i64, user_id: i64) -> Result<(), ListError> {
        if !self.is_owner(acting_user) {
            return Err(ListError::PermissionDenied(
                "only the list owner can remove collaborators".to_string(),
            ));
        }
        let before = self.shared_with.len();
        self.shared_with.retain(|c| c.user_id != user_id);
        if before == self.shared_with.len() {
            return Err(ListError::NotFound(format!(
                "user {} is not a collaborator",
                user_id
            )));
        }
        Ok(())
    }

    pub fn sync_state(&self, client_id: i64) -> Option<&SyncClientState> {
        self.sync_states.iter().find(|s| s.client_id == client_id)
    }

    pub fn set_sync_state(&mut self, state: SyncClientState) {
        self.sync_states.retain(|s| s.client_id != state.client_id);
        self.sync_states.push(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_of(ids: &[&str]) -> ListData {
        let mut list = ListData::owned_by(1);
        for id in ids {
            list.add_item(id, LOCAL_CLIENT).unwrap();
        }
        list
    }

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_reorder_positions_follow_order() {
        let mut list = list_of(&["a", "b", "c", "d"]);
        list.reorder(&ids(&["c", "a", "d", "b"]), LOCAL_CLIENT).unwrap();
        for (idx, id) in ["c", "a", "d", "b"].iter().enumerate() {
            let item = list.items.iter().find(|i| i.item_id == *id).unwrap();
            assert_eq!(item.position, idx);
        }
        assert_eq!(list.item_ids(), ids(&["c", "a", "d", "b"]));
    }

    #[test]
    fn test_reorder_mismatch_leaves_list_unchanged() {
        let mut list = list_of(&["a", "b", "c"]);
        let before = list.clone();

        let err = list.reorder(&ids(&["a", "b"]), LOCAL_CLIENT).unwrap_err();
        assert_eq!(
            err,
            ListError::InvalidArgument("reorder operation must include all playlist items".to_string())
        );
        assert!(list.reorder(&ids(&["a", "b", "x"]), LOCAL_CLIENT).is_err());
        assert!(list.reorder(&ids(&["a", "a", "b"]), LOCAL_CLIENT).is_err());
        assert!(list.reorder(&ids(&["a", "b", "c", "c"]), LOCAL_CLIENT).is_err());
        assert_eq!(list, before);
    }

    #[test]
    fn test_add_then_remove_restores_order() {
        let mut list = list_of(&["a", "b", "c"]);
        let before = list.item_ids();
        list.add_item("z", 7).unwrap();
        assert_eq!(list.len(), 4);
        list.remove_item("z", 7).unwrap();
        assert_eq!(list.item_ids(), before);
        for (idx, item) in list.items.iter().enumerate() {
            assert_eq!(item.position, idx);
        }
    }

    #[test]
    fn test_remove_middle_keeps_positions_dense() {
        let mut list = list_of(&["a", "b", "c", "d"]);
        list.remove_item("b", LOCAL_CLIENT).unwrap();
        let positions: Vec<usize> = list.items.iter().map(|i| i.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
        assert_eq!(list.item_ids(), ids(&["a", "c", "d"]));
    }

    #[test]
    fn test_duplicate_add_and_missing_remove() {
        let mut list = list_of(&["a"]);
        assert!(matches!(list.add_item("a", 0), Err(ListError::InvalidArgument(_))));
        assert!(matches!(list.remove_item("x", 0), Err(ListError::NotFound(_))));
    }

    #[test]
    fn test_history_is_append_only() {
        let mut list = list_of(&["a", "b"]);
        let first = list.change_history.clone();
        list.reorder(&ids(&["b", "a"]), 3).unwrap();
        list.remove_item("a", 3).unwrap();
        assert_eq!(&list.change_history[..first.len()], &first[..]);
        let kinds: Vec<ChangeType> = list.change_history.iter().map(|r| r.change_type).collect();
        assert_eq!(
            kinds,
            vec![ChangeType::Add, ChangeType::Add, ChangeType::Reorder, ChangeType::Remove]
        );
        assert_eq!(list.modified_by, 3);
    }

    #[test]
    fn test_move_item_clamps() {
        let mut list = list_of(&["a", "b", "c"]);
        list.move_item("a", 10, LOCAL_CLIENT).unwrap();
        assert_eq!(list.item_ids(), ids(&["b", "c", "a"]));
        list.move_item("a", 0, LOCAL_CLIENT).unwrap();
        assert_eq!(list.item_ids(), ids(&["a", "b", "c"]));
    }

    #[test]
    fn test_normalize_positions() {
        let mut list = ListData::from_item_ids(["a", "b", "c"]);
        list.items[0].position = 10;
        list.items[1].position = 4;
        list.items[2].position = 4;
        list.normalize_positions();
        let positions: Vec<usize> = list.items.iter().map(|i| i.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
        assert_eq!(list.item_ids(), ids(&["b", "c", "a"]));
    }

    #[test]
    fn test_sharing_rules() {
        let mut list = ListData::owned_by(1);
        assert!(matches!(
            list.share(2, 3, Permission::Read),
            Err(ListError::PermissionDenied(_))
        ));
        list.share(1, 2, Permission::Read).unwrap();
        list.share(1, 3, Permission::Write).unwrap();
        assert!(list.can_read(2));
        assert!(!list.can_write(2));
        assert!(list.can_read(3));
        assert!(list.can_write(3));
        assert!(!list.can_read(4));

        list.is_public = true;
        assert!(list.can_read(4));
        assert!(!list.can_write(4));

        assert!(matches!(list.unshare(3, 2), Err(ListError::PermissionDenied(_))));
        list.unshare(1, 2).unwrap();
        assert!(matches!(list.unshare(1, 2), Err(ListError::NotFound(_))));
    }

    #[test]
    fn test_removed_locally_since() {
        let mut list = list_of(&["a"]);
        let t0 = Utc::now() - chrono::Duration::seconds(5);
        list.remove_item("a", LOCAL_CLIENT).unwrap();
        assert!(list.removed_locally_since("a", t0));
        assert!(!list.removed_locally_since("a", Utc::now() + chrono::Duration::seconds(5)));
    }
}
