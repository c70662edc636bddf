//! Array-backed decision tree with flash paging
//!
//! File layout, little endian: `u32 magic | u32 nodeCount | nodeCount x u32`.

use crate::errors::TreeError;
use crate::flash::{FlashFs, OpenMode};
use crate::node::{PackedNode, MAX_NODES};
use crate::sample::Sample;
use crate::store::NO_TREE;
use std::io::{self, BufReader, BufWriter, Read, Write};
use tracing::{debug, warn};

/// "TREE"
pub const TREE_MAGIC: u32 = 0x5452_4545;

/// Label returned when a walk runs off the node array or the sample width
pub const FALLBACK_LABEL: u8 = 0;

/// Flash path of tree `index`
pub fn tree_path(index: u8) -> Result<String, TreeError> {
    if index == NO_TREE {
        return Err(TreeError::Unassigned);
    }
    Ok(format!("/tree_{index}.bin"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedTree {
    index: u8,
    nodes: Vec<PackedNode>,
    loaded: bool,
}

impl PackedTree {
    /// Unloaded tree bound to `index`
    pub fn new(index: u8) -> Self {
        Self {
            index,
            nodes: Vec::new(),
            loaded: false,
        }
    }

    /// Freshly induced tree, resident in RAM
    pub fn from_nodes(index: u8, nodes: Vec<PackedNode>) -> Self {
        Self {
            index,
            loaded: !nodes.is_empty(),
            nodes,
        }
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn nodes(&self) -> &[PackedNode] {
        &self.nodes
    }

    /// Classify by walking from the root; never fails
    ///
    /// A node that points past the array, or a feature beyond the sample
    /// width, yields [`FALLBACK_LABEL`].
    pub fn predict_sample(&self, sample: &Sample) -> u8 {
        let mut index = 0usize;
        // a well-formed walk visits each node at most once
        for _ in 0..=self.nodes.len() {
            let Some(node) = self.nodes.get(index) else {
                return FALLBACK_LABEL;
            };
            if node.is_leaf() {
                return node.label();
            }
            let Some(value) = sample.feature(node.feature_id() as usize) else {
                return FALLBACK_LABEL;
            };
            index = if value <= node.threshold() {
                node.left_child() as usize
            } else {
                node.right_child() as usize
            };
        }
        FALLBACK_LABEL
    }

    pub fn count_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn count_leaf_nodes(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Levels on the longest root-to-leaf path, using an explicit stack
    pub fn depth(&self) -> usize {
        if self.nodes.is_empty() {
            return 0;
        }
        let mut deepest = 0;
        let mut stack = vec![(0usize, 1usize)];
        let mut visits = 0;
        while let Some((index, level)) = stack.pop() {
            visits += 1;
            if visits > self.nodes.len() {
                warn!(tree = self.index, "cycle in tree structure, depth truncated");
                break;
            }
            let Some(node) = self.nodes.get(index) else {
                continue;
            };
            deepest = deepest.max(level);
            if !node.is_leaf() {
                stack.push((node.left_child() as usize, level + 1));
                stack.push((node.right_child() as usize, level + 1));
            }
        }
        deepest
    }

    /// Write nodes to `/tree_<index>.bin`
    pub fn save(&self, fs: &dyn FlashFs) -> Result<(), TreeError> {
        if self.nodes.is_empty() {
            return Err(TreeError::Empty(self.index));
        }
        let path = tree_path(self.index)?;
        let io_err = |op, source| TreeError::Io {
            op,
            path: path.clone(),
            source,
        };
        let file = fs
            .open(&path, OpenMode::Write)
            .map_err(|e| io_err("open", e))?;
        let mut writer = BufWriter::new(file);
        let mut encode = || -> io::Result<()> {
            writer.write_all(&TREE_MAGIC.to_le_bytes())?;
            writer.write_all(&(self.nodes.len() as u32).to_le_bytes())?;
            for node in &self.nodes {
                writer.write_all(&node.raw().to_le_bytes())?;
            }
            writer.flush()
        };
        encode().map_err(|e| io_err("write", e))?;
        debug!(tree = self.index, nodes = self.nodes.len(), "tree saved");
        Ok(())
    }

    /// Read nodes back; rejects bad magic and counts outside 1..=2047
    pub fn load(&mut self, fs: &dyn FlashFs) -> Result<(), TreeError> {
        if self.loaded {
            return Ok(());
        }
        let path = tree_path(self.index)?;
        let io_err = |op, source| TreeError::Io {
            op,
            path: path.clone(),
            source,
        };
        let file = fs
            .open(&path, OpenMode::Read)
            .map_err(|e| io_err("open", e))?;
        let mut reader = BufReader::new(file);
        let mut word = [0u8; 4];

        reader.read_exact(&mut word).map_err(|e| io_err("read", e))?;
        let magic = u32::from_le_bytes(word);
        if magic != TREE_MAGIC {
            return Err(TreeError::BadMagic {
                path: path.clone(),
                found: magic,
            });
        }

        reader.read_exact(&mut word).map_err(|e| io_err("read", e))?;
        let count = u32::from_le_bytes(word);
        if count == 0 || count as usize > MAX_NODES {
            return Err(TreeError::NodeCount {
                path: path.clone(),
                count,
                max: MAX_NODES,
            });
        }

        let mut nodes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            reader.read_exact(&mut word).map_err(|e| io_err("read", e))?;
            nodes.push(PackedNode::from_raw(u32::from_le_bytes(word)));
        }
        self.nodes = nodes;
        self.loaded = true;
        debug!(tree = self.index, nodes = count, "tree loaded");
        Ok(())
    }

    /// Save and drop the RAM copy; no-op when not loaded
    pub fn release(&mut self, fs: &dyn FlashFs) -> Result<(), TreeError> {
        if !self.loaded {
            return Ok(());
        }
        let saved = self.save(fs);
        self.nodes = Vec::new();
        self.loaded = false;
        saved
    }

    /// Drop RAM nodes without touching flash
    pub fn unload(&mut self) {
        self.nodes = Vec::new();
        self.loaded = false;
    }

    /// Clear RAM, delete the flash file and forget the index
    pub fn purge(&mut self, fs: &dyn FlashFs) {
        self.unload();
        if let Ok(path) = tree_path(self.index) {
            if fs.exists(&path) {
                if let Err(err) = fs.remove(&path) {
                    warn!(path = %path, error = %err, "failed to remove tree file");
                }
            }
        }
        self.index = NO_TREE;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::MemFs;

    /// f0 <= 1 ? (f1 <= 0 ? 0 : 1) : 2
    fn small_tree(index: u8) -> PackedTree {
        PackedTree::from_nodes(
            index,
            vec![
                PackedNode::split(0, 1, 1).unwrap(),
                PackedNode::split(1, 0, 3).unwrap(),
                PackedNode::leaf(2),
                PackedNode::leaf(0),
                PackedNode::leaf(1),
            ],
        )
    }

    fn all_inputs() -> Vec<Sample> {
        let mut out = Vec::new();
        for a in 0..4 {
            for b in 0..4 {
                out.push(Sample::from_values(0, &[a, b]).unwrap());
            }
        }
        out
    }

    #[test]
    fn test_predict_walk() {
        let tree = small_tree(0);
        let s = |a, b| Sample::from_values(0, &[a, b]).unwrap();
        assert_eq!(tree.predict_sample(&s(0, 0)), 0);
        assert_eq!(tree.predict_sample(&s(1, 2)), 1);
        assert_eq!(tree.predict_sample(&s(3, 0)), 2);
    }

    #[test]
    fn test_structure_queries() {
        let tree = small_tree(0);
        assert_eq!(tree.count_nodes(), 5);
        assert_eq!(tree.count_leaf_nodes(), 3);
        assert_eq!(tree.depth(), 3);
        assert_eq!(PackedTree::new(1).depth(), 0);
    }

    #[test]
    fn test_corrupt_tree_falls_back() {
        // child index past the array
        let dangling = PackedTree::from_nodes(0, vec![PackedNode::split(0, 1, 40).unwrap()]);
        let sample = Sample::from_values(0, &[0]).unwrap();
        assert_eq!(dangling.predict_sample(&sample), FALLBACK_LABEL);

        // feature beyond the sample width
        let wide = PackedTree::from_nodes(
            0,
            vec![
                PackedNode::split(9, 1, 1).unwrap(),
                PackedNode::leaf(4),
                PackedNode::leaf(5),
            ],
        );
        assert_eq!(wide.predict_sample(&sample), FALLBACK_LABEL);

        // self loop
        let looped = PackedTree::from_nodes(0, vec![PackedNode::split(0, 3, 0).unwrap()]);
        assert_eq!(looped.predict_sample(&sample), FALLBACK_LABEL);
        assert!(looped.depth() >= 1);
    }

    #[test]
    fn test_save_load_preserves_predictions() {
        let fs = MemFs::new();
        let tree = small_tree(3);
        tree.save(&fs).unwrap();
        assert_eq!(fs.file_len("/tree_3.bin"), Some(8 + 5 * 4));

        let mut loaded = PackedTree::new(3);
        loaded.load(&fs).unwrap();
        assert!(loaded.is_loaded());
        for sample in all_inputs() {
            assert_eq!(loaded.predict_sample(&sample), tree.predict_sample(&sample));
        }
    }

    #[test]
    fn test_zero_node_file_rejected() {
        let fs = MemFs::new();
        let mut bytes = TREE_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0u32.to_le_bytes());
        fs.put("/tree_0.bin", bytes);

        let mut tree = PackedTree::new(0);
        assert!(matches!(
            tree.load(&fs),
            Err(TreeError::NodeCount { count: 0, .. })
        ));
        assert!(!tree.is_loaded());
        assert_eq!(tree.count_nodes(), 0);
    }

    #[test]
    fn test_oversized_and_bad_magic_rejected() {
        let fs = MemFs::new();
        let mut bytes = TREE_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&2048u32.to_le_bytes());
        fs.put("/tree_1.bin", bytes);
        assert!(matches!(
            PackedTree::new(1).load(&fs),
            Err(TreeError::NodeCount { count: 2048, .. })
        ));

        fs.put("/tree_2.bin", vec![0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 16, 0]);
        assert!(matches!(
            PackedTree::new(2).load(&fs),
            Err(TreeError::BadMagic { .. })
        ));
    }

    #[test]
    fn test_release_and_purge() {
        let fs = MemFs::new();
        let mut tree = small_tree(4);
        tree.release(&fs).unwrap();
        assert!(!tree.is_loaded());
        assert!(fs.exists("/tree_4.bin"));
        tree.release(&fs).unwrap();

        tree.load(&fs).unwrap();
        assert_eq!(tree.count_nodes(), 5);
        tree.purge(&fs);
        assert_eq!(tree.index(), NO_TREE);
        assert!(!fs.exists("/tree_4.bin"));
        assert!(matches!(tree.load(&fs), Err(TreeError::Unassigned)));
    }
}
