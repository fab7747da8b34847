//! Active host selection.

use super::{HostEntry, HostStatus};

/// Pick the active host path.
///
/// No reachable entry selects nothing.  A current selection that is still
/// reachable is kept even when others are reachable too.  Otherwise the
/// first reachable entry in list order wins.
pub fn select_active(entries: &[HostEntry], current: Option<&str>) -> Option<String> {
    let reachable = |e: &&HostEntry| e.status == HostStatus::Connected;

    if let Some(current) = current {
        if entries
            .iter()
            .filter(reachable)
            .any(|e| e.record.host_path == current)
        {
            return Some(current.to_string());
        }
    }

    entries
        .iter()
        .find(reachable)
        .map(|e| e.record.host_path.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, status: HostStatus) -> HostEntry {
        let mut entry = HostEntry::new(hl_protocol::HostRecord {
            host_path: path.into(),
            host_label: path.into(),
            advertised_endpoint: "127.0.0.1:1".into(),
            pid: 1,
            last_seen: chrono::Utc::now(),
        });
        entry.status = status;
        entry
    }

    #[test]
    fn nothing_reachable_selects_nothing() {
        let entries = vec![
            entry("/h1", HostStatus::Disconnected),
            entry("/h2", HostStatus::Unknown),
        ];
        assert_eq!(select_active(&entries, None), None);
        assert_eq!(select_active(&entries, Some("/h1")), None);
    }

    #[test]
    fn single_reachable_is_selected() {
        let entries = vec![
            entry("/h1", HostStatus::Disconnected),
            entry("/h2", HostStatus::Connected),
        ];
        assert_eq!(select_active(&entries, None).as_deref(), Some("/h2"));
        assert_eq!(select_active(&entries, Some("/h1")).as_deref(), Some("/h2"));
    }

    #[test]
    fn selection_is_sticky_while_reachable() {
        let entries = vec![
            entry("/h2", HostStatus::Connected),
            entry("/h1", HostStatus::Connected),
        ];
        assert_eq!(select_active(&entries, Some("/h1")).as_deref(), Some("/h1"));
    }

    #[test]
    fn fails_over_in_list_order() {
        let entries = vec![
            entry("/h1", HostStatus::Disconnected),
            entry("/h2", HostStatus::Connected),
            entry("/h3", HostStatus::Connected),
        ];
        assert_eq!(select_active(&entries, Some("/h1")).as_deref(), Some("/h2"));
    }

    #[test]
    fn unknown_current_falls_back_to_first() {
        let entries = vec![
            entry("/h1", HostStatus::Connected),
            entry("/h2", HostStatus::Connected),
        ];
        assert_eq!(select_active(&entries, Some("/gone")).as_deref(), Some("/h1"));
    }
}
