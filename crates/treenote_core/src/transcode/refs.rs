//! Inline references embedded in node content.
//!
//! Content may point at attachments and other nodes with
//! `attachment:<uuid>` and `node:<uuid>` tokens (for example inside markdown
//! image or link targets). Import rewrites both through the id tables.

use crate::model::node::{AttachmentId, NodeId};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;
use uuid::Uuid;

static INLINE_REF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(attachment|node):([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})\b",
    )
    .expect("valid inline ref regex")
});

/// Kind of inline reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Attachment,
    Node,
}

/// Lists inline references in order of appearance.
pub fn inline_refs(content: &str) -> Vec<(RefKind, Uuid)> {
    INLINE_REF_RE
        .captures_iter(content)
        .filter_map(|caps| {
            let kind = match &caps[1] {
                "attachment" => RefKind::Attachment,
                _ => RefKind::Node,
            };
            Uuid::parse_str(&caps[2]).ok().map(|id| (kind, id))
        })
        .collect()
}

/// Rewrites references found in the tables; unknown ids stay as written.
pub fn rewrite_refs(
    content: &str,
    node_ids: &HashMap<NodeId, NodeId>,
    attachment_ids: &HashMap<AttachmentId, AttachmentId>,
) -> String {
    INLINE_REF_RE
        .replace_all(content, |caps: &Captures<'_>| {
            let table = match &caps[1] {
                "attachment" => attachment_ids,
                _ => node_ids,
            };
            match Uuid::parse_str(&caps[2])
                .ok()
                .and_then(|old| table.get(&old))
            {
                Some(new_id) => format!("{}:{new_id}", &caps[1]),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::{inline_refs, rewrite_refs, RefKind};
    use std::collections::HashMap;
    use uuid::Uuid;

    #[test]
    fn rewrites_known_refs_and_keeps_unknown() {
        let (old_att, new_att) = (Uuid::new_v4(), Uuid::new_v4());
        let (old_node, new_node) = (Uuid::new_v4(), Uuid::new_v4());
        let stranger = Uuid::new_v4();
        let content = format!(
            "![shot](attachment:{old_att}) see [plan](node:{old_node}) and node:{stranger}"
        );

        let rewritten = rewrite_refs(
            &content,
            &HashMap::from([(old_node, new_node)]),
            &HashMap::from([(old_att, new_att)]),
        );
        assert_eq!(
            rewritten,
            format!("![shot](attachment:{new_att}) see [plan](node:{new_node}) and node:{stranger}")
        );
    }

    #[test]
    fn node_table_does_not_rewrite_attachment_refs() {
        let id = Uuid::new_v4();
        let content = format!("attachment:{id}");
        let rewritten = rewrite_refs(
            &content,
            &HashMap::from([(id, Uuid::new_v4())]),
            &HashMap::new(),
        );
        assert_eq!(rewritten, content);
    }

    #[test]
    fn lists_refs_in_order() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let refs = inline_refs(&format!("node:{a} text attachment:{b} node:not-a-uuid"));
        assert_eq!(refs, vec![(RefKind::Node, a), (RefKind::Attachment, b)]);
    }
}
