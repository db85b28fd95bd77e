use indexmap::IndexMap;

use crate::collapse::{folded, FRAME_DELIMITER};

/// One frame at one depth of the call tree, with the samples of every stack passing through it.
#[derive(Debug, Default)]
pub struct FlameNode<'a> {
    name: &'a str,
    count: usize,
    self_count: usize,
    children: IndexMap<&'a str, FlameNode<'a>>,
}

impl<'a> FlameNode<'a> {
    fn new(name: &'a str) -> Self {
        FlameNode {
            name,
            ..Default::default()
        }
    }

    /// The frame identifier. Empty for the root.
    pub fn name(&self) -> &'a str {
        self.name
    }

    /// Samples of all stacks that pass through this frame.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Samples whose leaf is this frame.
    pub fn self_count(&self) -> usize {
        self.self_count
    }

    /// The frame's callees, in the order they were first seen.
    pub fn children(&self) -> impl Iterator<Item = &FlameNode<'a>> {
        self.children.values()
    }

    /// The callee named `name`, if any.
    pub fn child(&self, name: &str) -> Option<&FlameNode<'a>> {
        self.children.get(name)
    }
}

/// A frame placed on the canvas, measured in samples rather than pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// The frame identifier. Empty for the root.
    pub name: &'a str,
    /// 0 for the root, 1 for outermost frames, and so on.
    pub depth: usize,
    /// Samples to the left of this frame.
    pub start: usize,
    /// `start` plus this frame's sample count.
    pub end: usize,
}

impl Frame<'_> {
    /// Number of samples this frame covers.
    pub fn samples(&self) -> usize {
        self.end - self.start
    }
}

/// The call tree built from folded stack lines.
#[derive(Debug, Default)]
pub struct FlameTree<'a> {
    root: FlameNode<'a>,
    ignored: usize,
}

impl<'a> FlameTree<'a> {
    /// Builds the tree by inserting each folded line's frames in order.
    ///
    /// Lines that are not `stack count` are skipped and counted in [`FlameTree::ignored`].
    pub fn from_lines<I>(lines: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut tree = FlameTree::default();
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            match folded::parse_line(line) {
                Some((stack, nsamples)) => tree.insert(stack, nsamples),
                None => tree.ignored += 1,
            }
        }
        tree
    }

    /// Adds `nsamples` samples of `stack` (frames joined by `;`).
    ///
    /// Counts saturate at `usize::MAX`.
    pub fn insert(&mut self, stack: &'a str, nsamples: usize) {
        if nsamples == 0 {
            return;
        }
        let mut node = &mut self.root;
        node.count = node.count.saturating_add(nsamples);
        for func in stack.split(FRAME_DELIMITER) {
            node = node
                .children
                .entry(func)
                .or_insert_with(|| FlameNode::new(func));
            node.count = node.count.saturating_add(nsamples);
        }
        node.self_count = node.self_count.saturating_add(nsamples);
    }

    /// The node standing for all samples.
    pub fn root(&self) -> &FlameNode<'a> {
        &self.root
    }

    /// Total number of samples.
    pub fn total(&self) -> usize {
        self.root.count
    }

    /// Number of input lines that could not be parsed.
    pub fn ignored(&self) -> usize {
        self.ignored
    }

    /// Lays out every node depth-first, children left to right in insertion order.
    ///
    /// The root comes first. Each child starts where its previous sibling ended, and the first
    /// child starts where its parent starts.
    pub fn frames(&self) -> Vec<Frame<'a>> {
        let mut frames = Vec::new();
        let mut pending = vec![(&self.root, 0, 0)];
        while let Some((node, depth, start)) = pending.pop() {
            frames.push(Frame {
                name: node.name,
                depth,
                start,
                end: start.saturating_add(node.count),
            });

            let mut offset = start;
            let mut children = Vec::with_capacity(node.children.len());
            for child in node.children.values() {
                children.push((child, depth + 1, offset));
                offset = offset.saturating_add(child.count);
            }
            // reversed so the first child is popped first
            pending.extend(children.into_iter().rev());
        }
        frames
    }
}
