//! Repository trees shared by the engine tests.

use nodecounter_shared::PageRef;
use nodecounter_storage::{MemoryRepository, TreeNode};

/// Content node holding `n` nodes: a chain of `par` containers, each with
/// up to 49 leaf children.
pub fn content_with(n: usize) -> TreeNode {
    let mut content = TreeNode::new("jcr:content", "cq:PageContent");
    let mut remaining = n;
    let mut group = 0;
    while remaining > 0 {
        remaining -= 1;
        let take = remaining.min(49);
        remaining -= take;
        content = content.with_child(
            TreeNode::new(format!("par{group}"), "nt:unstructured").with_children(
                (0..take).map(|i| TreeNode::new(format!("c{i}"), "nt:unstructured")),
            ),
        );
        group += 1;
    }
    content
}

/// `/content` with `pages` sibling pages `p0..`, each holding `nodes` nodes.
pub fn flat_site(pages: usize, nodes: usize) -> MemoryRepository {
    let repo = MemoryRepository::new();
    let site = TreeNode::new("content", "sling:Folder").with_children(
        (0..pages).map(|i| TreeNode::new(format!("p{i}"), "cq:Page").with_child(content_with(nodes))),
    );
    repo.import_tree("/", &site).expect("fixture import");
    repo
}

pub fn page_refs(pages: usize) -> Vec<PageRef> {
    (0..pages)
        .map(|i| PageRef::new(format!("/content/p{i}")))
        .collect()
}

/// Three pages under `/content`: `a` with 1500 in-scope nodes and a nested
/// page `b` (400 nodes) inside its content, plus `c` with 10 nodes.
pub fn three_page_site() -> MemoryRepository {
    let repo = MemoryRepository::new();
    let b = TreeNode::new("b", "cq:Page").with_child(content_with(400));
    let a = TreeNode::new("a", "cq:Page").with_child(content_with(1500).with_child(b));
    let c = TreeNode::new("c", "cq:Page").with_child(content_with(10));
    repo.import_tree(
        "/",
        &TreeNode::new("content", "sling:Folder").with_children([a, c]),
    )
    .expect("fixture import");
    repo
}
