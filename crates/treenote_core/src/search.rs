//! Tag and text retrieval over the in-memory store.
//!
//! # Responsibility
//! - Find nodes by normalized tag and list tag usage.
//! - Case-insensitive substring search over titles and content.
//!
//! # Invariants
//! - Results follow tree order (roots in order, pre-order below each).
//! - Text search skips symlinks, so every hit is a content owner.
//! - With a branch root set, only nodes inside that branch are returned.

use crate::model::node::{normalize_tag, Node, NodeId};
use crate::store::NodeStore;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

const DEFAULT_LIMIT: u32 = 20;
const MAX_LIMIT: u32 = 200;
const SNIPPET_CONTEXT_CHARS: usize = 40;
const SNIPPET_MAX_CHARS: usize = 120;

pub type SearchResult<T> = Result<T, SearchError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    /// Branch root passed as scope does not exist.
    BranchNotFound(NodeId),
}

impl Display for SearchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BranchNotFound(id) => write!(f, "search branch root not found: {id}"),
        }
    }
}

impl Error for SearchError {}

/// Text search options.
#[derive(Debug, Clone)]
pub struct TextQuery {
    pub text: String,
    /// Restrict hits to this branch.
    pub branch_root: Option<NodeId>,
    /// Maximum hits. Clamped to `1..=200`.
    pub limit: u32,
}

impl TextQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            branch_root: None,
            limit: DEFAULT_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub node_id: NodeId,
    pub title: String,
    /// Excerpt around the first content match, or the content head when only
    /// the title matched.
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
}

/// Nodes carrying `tag` (normalized before matching).
pub fn find_by_tag(
    store: &NodeStore,
    tag: &str,
    branch_root: Option<NodeId>,
) -> SearchResult<Vec<NodeId>> {
    let Some(tag) = normalize_tag(tag) else {
        return Ok(Vec::new());
    };
    Ok(scope(store, branch_root)?
        .into_iter()
        .filter(|node| node.tags.contains(&tag))
        .map(|node| node.id)
        .collect())
}

/// Every tag in use with its node count, sorted by tag.
pub fn list_tags(store: &NodeStore) -> Vec<TagCount> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for node in store.nodes() {
        for tag in &node.tags {
            *counts.entry(tag.as_str()).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .map(|(tag, count)| TagCount {
            tag: tag.to_string(),
            count,
        })
        .collect()
}

/// Case-insensitive title and content search. Blank text yields no hits.
pub fn search_text(store: &NodeStore, query: &TextQuery) -> SearchResult<Vec<SearchHit>> {
    let needle = fold(query.text.trim());
    if needle.is_empty() {
        return Ok(Vec::new());
    }
    let limit = query.limit.clamp(1, MAX_LIMIT) as usize;

    let mut hits = Vec::new();
    for node in scope(store, query.branch_root)? {
        let Some(content) = node.own_content() else {
            continue;
        };
        let content_chars: Vec<char> = content.chars().collect();
        let content_match = find_folded(&content_chars, &needle);
        let title_match = find_folded(&node.title.chars().collect::<Vec<_>>(), &needle).is_some();
        if content_match.is_none() && !title_match {
            continue;
        }
        hits.push(SearchHit {
            node_id: node.id,
            title: node.title.clone(),
            snippet: snippet(&content_chars, content_match, needle.len()),
        });
        if hits.len() >= limit {
            break;
        }
    }
    Ok(hits)
}

fn scope(store: &NodeStore, branch_root: Option<NodeId>) -> SearchResult<Vec<&Node>> {
    let ids = match branch_root {
        Some(root_id) => {
            if !store.contains(root_id) {
                return Err(SearchError::BranchNotFound(root_id));
            }
            store.descendants(root_id)
        }
        None => store
            .root_nodes()
            .iter()
            .flat_map(|root_id| store.descendants(*root_id))
            .collect(),
    };
    Ok(ids.into_iter().filter_map(|id| store.get(id)).collect())
}

/// One-to-one lowercase mapping, so char positions line up with the source.
fn fold(value: &str) -> Vec<char> {
    value.chars().map(fold_char).collect()
}

fn fold_char(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

fn find_folded(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    (0..=haystack.len() - needle.len()).find(|start| {
        haystack[*start..*start + needle.len()]
            .iter()
            .zip(needle)
            .all(|(h, n)| fold_char(*h) == *n)
    })
}

fn snippet(content: &[char], matched_at: Option<usize>, needle_len: usize) -> String {
    let (start, end) = match matched_at {
        Some(position) => (
            position.saturating_sub(SNIPPET_CONTEXT_CHARS),
            (position + needle_len + SNIPPET_CONTEXT_CHARS).min(content.len()),
        ),
        None => (0, content.len()),
    };
    let end = end.min(start + SNIPPET_MAX_CHARS);
    let mut out: String = content[start..end]
        .iter()
        .map(|c| if *c == '\n' || *c == '\r' { ' ' } else { *c })
        .collect();
    if start > 0 {
        out.insert_str(0, "...");
    }
    if end < content.len() {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{find_by_tag, list_tags, search_text, SearchError, TextQuery};
    use crate::model::node::Node;
    use crate::store::NodeStore;
    use uuid::Uuid;

    fn add(store: &mut NodeStore, mut node: Node, tags: &[&str]) -> Uuid {
        let id = node.id;
        let parent = node.parent;
        node.tags = tags.iter().map(|tag| tag.to_string()).collect();
        store.insert(node);
        store.attach(id, parent, None);
        id
    }

    #[test]
    fn tags_are_found_in_tree_order_and_counted() {
        let mut store = NodeStore::new();
        let a = add(&mut store, Node::new_content("A", "", None), &["rust", "work"]);
        let b = add(&mut store, Node::new_content("B", "", Some(a)), &["rust"]);
        let c = add(&mut store, Node::new_content("C", "", None), &["home"]);

        assert_eq!(find_by_tag(&store, " RUST ", None).unwrap(), vec![a, b]);
        assert_eq!(find_by_tag(&store, "rust", Some(b)).unwrap(), vec![b]);
        assert!(find_by_tag(&store, "  ", None).unwrap().is_empty());
        let missing = Uuid::new_v4();
        assert_eq!(
            find_by_tag(&store, "home", Some(missing)),
            Err(SearchError::BranchNotFound(missing))
        );
        assert_eq!(find_by_tag(&store, "home", None).unwrap(), vec![c]);

        let tags = list_tags(&store);
        let pairs: Vec<_> = tags.iter().map(|t| (t.tag.as_str(), t.count)).collect();
        assert_eq!(pairs, vec![("home", 1), ("rust", 2), ("work", 1)]);
    }

    #[test]
    fn text_search_skips_symlinks_and_builds_snippets() {
        let mut store = NodeStore::new();
        let long_body = format!("{}needle in the middle{}", "x".repeat(60), "y".repeat(60));
        let a = add(&mut store, Node::new_content("Haystack", long_body, None), &[]);
        let b = add(&mut store, Node::new_content("Needle notes", "short", Some(a)), &[]);
        add(&mut store, Node::new_symlink("needle link", a, None), &[]);

        let hits = search_text(&store, &TextQuery::new("NEEDLE")).unwrap();
        let ids: Vec<_> = hits.iter().map(|hit| hit.node_id).collect();
        assert_eq!(ids, vec![a, b]);
        assert!(hits[0].snippet.starts_with("..."));
        assert!(hits[0].snippet.ends_with("..."));
        assert!(hits[0].snippet.contains("needle in the middle"));
        assert_eq!(hits[1].snippet, "short");

        let mut limited = TextQuery::new("needle");
        limited.limit = 1;
        assert_eq!(search_text(&store, &limited).unwrap().len(), 1);

        let mut scoped = TextQuery::new("needle");
        scoped.branch_root = Some(b);
        let scoped_hits = search_text(&store, &scoped).unwrap();
        assert_eq!(scoped_hits.len(), 1);
        assert_eq!(scoped_hits[0].node_id, b);

        assert!(search_text(&store, &TextQuery::new("   ")).unwrap().is_empty());
    }
}
