//! Registry of remote-control host agents visible to the room.
//!
//! Every `remote-hosts-list` broadcast replaces the registry wholesale.
//! Hosts live in a `Vec` arena in broadcast order with a host-id index
//! beside it.
//!
//! Ownership is taken from the server when it tags it. When it does not,
//! a host whose id matches the locally remembered claimed host id is
//! reported as [`HostOwnership::You`]. That fallback is a client-side
//! trust decision: two participants can both believe they own the same
//! untagged host until the server says otherwise.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ── Wire schema ──────────────────────────────────────────────────

/// Who controls a host, from the local participant's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostOwnership {
    You,
    Other,
    Unclaimed,
}

/// One host entry as broadcast by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostAnnouncement {
    #[serde(alias = "id")]
    pub host_id: String,
    #[serde(default)]
    pub busy: bool,
    #[serde(default)]
    pub ownership: Option<HostOwnership>,
    #[serde(default)]
    pub claimed_by: Option<String>,
    #[serde(default, alias = "name")]
    pub label: Option<String>,
}

/// `remote-hosts-list`, either `{"hosts": [...]}` or a bare array.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum HostsList {
    Wrapped { hosts: Vec<HostAnnouncement> },
    Bare(Vec<HostAnnouncement>),
}

impl HostsList {
    pub fn into_hosts(self) -> Vec<HostAnnouncement> {
        match self {
            HostsList::Wrapped { hosts } | HostsList::Bare(hosts) => hosts,
        }
    }
}

// ── HostRecord ───────────────────────────────────────────────────

/// A known host agent with reconciled ownership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRecord {
    pub host_id: String,
    pub busy: bool,
    pub ownership: HostOwnership,
    pub label: String,
}

impl HostRecord {
    fn reconcile(
        announcement: &HostAnnouncement,
        identity: Option<&str>,
        claimed_host_id: Option<&str>,
    ) -> Self {
        let ownership = match (&announcement.ownership, &announcement.claimed_by) {
            (Some(explicit), _) => *explicit,
            (None, Some(owner)) if Some(owner.as_str()) == identity => HostOwnership::You,
            (None, Some(_)) => HostOwnership::Other,
            (None, None) if Some(announcement.host_id.as_str()) == claimed_host_id => {
                HostOwnership::You
            }
            (None, None) => HostOwnership::Unclaimed,
        };

        Self {
            host_id: announcement.host_id.clone(),
            busy: announcement.busy,
            ownership,
            label: announcement
                .label
                .clone()
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| announcement.host_id.clone()),
        }
    }
}

// ── HostRegistry ─────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct HostRegistry {
    announcements: Vec<HostAnnouncement>,
    hosts: Vec<HostRecord>,
    index: HashMap<String, usize>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole registry with a new broadcast.
    ///
    /// Entries with an empty host id are dropped; for duplicate ids the
    /// last entry wins.
    pub fn replace(
        &mut self,
        announcements: Vec<HostAnnouncement>,
        identity: Option<&str>,
        claimed_host_id: Option<&str>,
    ) {
        let mut deduped: Vec<HostAnnouncement> = Vec::with_capacity(announcements.len());
        let mut seen: HashMap<String, usize> = HashMap::new();
        for a in announcements.into_iter().filter(|a| !a.host_id.is_empty()) {
            match seen.get(&a.host_id) {
                Some(&slot) => {
                    if let Some(existing) = deduped.get_mut(slot) {
                        *existing = a;
                    }
                }
                None => {
                    seen.insert(a.host_id.clone(), deduped.len());
                    deduped.push(a);
                }
            }
        }
        self.announcements = deduped;
        self.rebuild(identity, claimed_host_id);
    }

    /// Re-derive ownership after the local claim changed.
    pub fn reconcile(&mut self, identity: Option<&str>, claimed_host_id: Option<&str>) {
        self.rebuild(identity, claimed_host_id);
    }

    pub fn get(&self, host_id: &str) -> Option<&HostRecord> {
        self.index.get(host_id).and_then(|&i| self.hosts.get(i))
    }

    pub fn contains(&self, host_id: &str) -> bool {
        self.index.contains_key(host_id)
    }

    pub fn hosts(&self) -> &[HostRecord] {
        &self.hosts
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn clear(&mut self) {
        self.announcements.clear();
        self.hosts.clear();
        self.index.clear();
    }

    fn rebuild(&mut self, identity: Option<&str>, claimed_host_id: Option<&str>) {
        self.hosts = self
            .announcements
            .iter()
            .map(|a| HostRecord::reconcile(a, identity, claimed_host_id))
            .collect();
        self.index = self
            .hosts
            .iter()
            .enumerate()
            .map(|(i, h)| (h.host_id.clone(), i))
            .collect();
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn announce(id: &str) -> HostAnnouncement {
        HostAnnouncement {
            host_id: id.to_string(),
            busy: false,
            ownership: None,
            claimed_by: None,
            label: None,
        }
    }

    #[test]
    fn untagged_host_matching_claim_is_yours() {
        let mut registry = HostRegistry::new();
        registry.replace(vec![announce("h1"), announce("h2")], Some("alice"), Some("h2"));

        assert_eq!(registry.get("h1").unwrap().ownership, HostOwnership::Unclaimed);
        assert_eq!(registry.get("h2").unwrap().ownership, HostOwnership::You);
    }

    #[test]
    fn explicit_ownership_wins_over_local_claim() {
        let mut registry = HostRegistry::new();
        let mut h = announce("h1");
        h.ownership = Some(HostOwnership::Other);
        registry.replace(vec![h], Some("alice"), Some("h1"));

        assert_eq!(registry.get("h1").unwrap().ownership, HostOwnership::Other);
    }

    #[test]
    fn claimed_by_is_compared_to_identity() {
        let mut registry = HostRegistry::new();
        let mut mine = announce("h1");
        mine.claimed_by = Some("alice".into());
        let mut theirs = announce("h2");
        theirs.claimed_by = Some("bob".into());
        registry.replace(vec![mine, theirs], Some("alice"), None);

        assert_eq!(registry.get("h1").unwrap().ownership, HostOwnership::You);
        assert_eq!(registry.get("h2").unwrap().ownership, HostOwnership::Other);
    }

    #[test]
    fn replace_is_wholesale() {
        let mut registry = HostRegistry::new();
        registry.replace(vec![announce("h1"), announce("h2")], None, None);
        registry.replace(vec![announce("h3")], None, None);

        assert_eq!(registry.len(), 1);
        assert!(!registry.contains("h1"));
        assert!(registry.contains("h3"));
    }

    #[test]
    fn duplicates_and_empty_ids() {
        let mut registry = HostRegistry::new();
        let mut busy = announce("h1");
        busy.busy = true;
        registry.replace(vec![announce("h1"), announce(""), busy], None, None);

        assert_eq!(registry.len(), 1);
        assert!(registry.get("h1").unwrap().busy);
    }

    #[test]
    fn reconcile_after_claim_echo() {
        let mut registry = HostRegistry::new();
        registry.replace(vec![announce("h1")], Some("alice"), None);
        assert_eq!(registry.get("h1").unwrap().ownership, HostOwnership::Unclaimed);

        registry.reconcile(Some("alice"), Some("h1"));
        assert_eq!(registry.get("h1").unwrap().ownership, HostOwnership::You);
    }

    #[test]
    fn label_falls_back_to_id() {
        let mut registry = HostRegistry::new();
        let mut named = announce("h2");
        named.label = Some("Studio PC".into());
        registry.replace(vec![announce("h1"), named], None, None);

        assert_eq!(registry.get("h1").unwrap().label, "h1");
        assert_eq!(registry.get("h2").unwrap().label, "Studio PC");
    }

    #[test]
    fn parses_both_list_shapes() {
        let wrapped: HostsList =
            serde_json::from_str(r#"{"hosts":[{"hostId":"h1","busy":true}]}"#).unwrap();
        let bare: HostsList = serde_json::from_str(r#"[{"id":"h1","name":"Desk"}]"#).unwrap();

        let wrapped = wrapped.into_hosts();
        assert!(wrapped[0].busy);
        let bare = bare.into_hosts();
        assert_eq!(bare[0].host_id, "h1");
        assert_eq!(bare[0].label.as_deref(), Some("Desk"));
    }
}
