//! Block cache differ.
//!
//! Reuses the trees of an unchanged prefix and suffix of the previous block
//! sequence and parses only the middle window.

use futures::future::try_join_all;
use mdforge_core::{ForgeError, MarkdownParser, Tree};
use serde::Serialize;

/// One top-level Markdown fragment and its parsed tree.
#[derive(Debug, Clone)]
pub struct Block {
    pub source: String,
    pub tree: Tree,
}

/// Lengths of the reusable prefix and suffix. They never overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Edges {
    pub prefix: usize,
    pub suffix: usize,
}

/// Counters for one render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderStats {
    pub blocks: usize,
    pub reused_prefix: usize,
    pub reused_suffix: usize,
    pub parsed: usize,
}

pub fn reusable_edges(previous: &[Block], next: &[String]) -> Edges {
    let bound = previous.len().min(next.len());

    let prefix = previous
        .iter()
        .zip(next)
        .take_while(|(block, source)| block.source == **source)
        .count();

    let suffix = previous
        .iter()
        .rev()
        .zip(next.iter().rev())
        .take(bound - prefix)
        .take_while(|(block, source)| block.source == **source)
        .count();

    Edges { prefix, suffix }
}

/// Produce exactly `next.len()` blocks, parsing only the sources outside the
/// reusable edges. Middle-window parses run concurrently; any failure fails
/// the whole call and nothing partial is returned.
pub async fn diff_blocks<P>(
    parser: &P,
    previous: &[Block],
    next: Vec<String>,
) -> Result<(Vec<Block>, RenderStats), ForgeError>
where
    P: MarkdownParser + ?Sized,
{
    let Edges { prefix, suffix } = reusable_edges(previous, &next);
    let (prev_len, next_len) = (previous.len(), next.len());
    let middle = prefix..next_len - suffix;

    let mut trees: Vec<Option<Tree>> = vec![None; next_len];
    for (i, slot) in trees.iter_mut().enumerate() {
        if i < prefix {
            *slot = Some(previous[i].tree.clone());
        } else if i >= next_len - suffix {
            *slot = Some(previous[prev_len - (next_len - i)].tree.clone());
        }
    }

    let parsed = try_join_all(
        next[middle.clone()]
            .iter()
            .map(|source| parser.parse_to_hast(source)),
    )
    .await?;
    for (slot, tree) in trees[middle.clone()].iter_mut().zip(parsed) {
        *slot = Some(tree);
    }

    let blocks = next
        .into_iter()
        .zip(trees)
        .map(|(source, tree)| {
            tree.map(|tree| Block { source, tree })
                .ok_or_else(|| ForgeError::Other("block left without a tree".into()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let stats = RenderStats {
        blocks: next_len,
        reused_prefix: prefix,
        reused_suffix: suffix,
        parsed: middle.len(),
    };
    Ok((blocks, stats))
}
