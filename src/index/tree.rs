//! Folder tree derived from stored names.
//!
//! Names are grouped by their directory component, each directory is split
//! into path elements, and elements are merged case-insensitively into a
//! forest.  Nodes keep the spelling of the first name that introduced them.

use std::collections::HashMap;
use std::fmt::Write as _;

use super::directory_of;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryNode {
    /// Lowercased, `/`-joined path from the root.  Unique within a tree.
    pub key:      String,
    /// Path element as first seen.
    pub label:    String,
    pub parent:   Option<usize>,
    pub children: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryTree {
    nodes: Vec<DirectoryNode>,
    roots: Vec<usize>,
}

impl DirectoryTree {
    pub fn nodes(&self) -> &[DirectoryNode] {
        &self.nodes
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn node(&self, id: usize) -> Option<&DirectoryNode> {
        self.nodes.get(id)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Find a node by directory path, ignoring case and separator style.
    pub fn find(&self, path: &str) -> Option<usize> {
        let key = node_key(split_elements(path));
        self.nodes.iter().position(|n| n.key == key)
    }

    /// `(label, parent label)` pairs in insertion order.
    pub fn pairs(&self) -> Vec<(&str, Option<&str>)> {
        self.nodes
            .iter()
            .map(|n| (n.label.as_str(), n.parent.map(|p| self.nodes[p].label.as_str())))
            .collect()
    }

    /// Indented text rendering, two spaces per level.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for &root in &self.roots {
            self.render_node(root, 0, &mut out);
        }
        out
    }

    fn render_node(&self, id: usize, depth: usize, out: &mut String) {
        let node = &self.nodes[id];
        let _ = writeln!(out, "{:indent$}{}", "", node.label, indent = depth * 2);
        for &child in &node.children {
            self.render_node(child, depth + 1, out);
        }
    }

    fn insert(&mut self, key: String, label: &str, parent: Option<usize>) -> usize {
        let id = self.nodes.len();
        self.nodes.push(DirectoryNode { key, label: label.to_owned(), parent, children: Vec::new() });
        match parent {
            Some(p) => self.nodes[p].children.push(id),
            None    => self.roots.push(id),
        }
        id
    }
}

/// Group `names` by directory and build the folder forest.
pub fn build_directory_tree<I, S>(names: I) -> DirectoryTree
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut tree = DirectoryTree::default();
    let mut by_key: HashMap<String, usize> = HashMap::new();

    for name in names {
        let elements = split_elements(directory_of(name.as_ref()));
        let mut parent = None;
        let mut key = String::new();

        for element in elements {
            if !key.is_empty() {
                key.push('/');
            }
            key.push_str(&element.to_lowercase());

            let id = match by_key.get(&key) {
                Some(&id) => id,
                None => {
                    let id = tree.insert(key.clone(), element, parent);
                    by_key.insert(key.clone(), id);
                    id
                }
            };
            parent = Some(id);
        }
    }
    tree
}

fn split_elements(dir: &str) -> Vec<&str> {
    dir.split(|c| c == '/' || c == '\\').filter(|s| !s.is_empty()).collect()
}

fn node_key(elements: Vec<&str>) -> String {
    elements.iter().map(|e| e.to_lowercase()).collect::<Vec<_>>().join("/")
}
