//! Ordered path → value tree used to assemble outbound documents

use crate::error::{Error, Result};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf(Value),
    /// Uniquely named children in insertion order
    Interior(Vec<(String, Node)>),
}

impl Node {
    fn child_index(children: &[(String, Node)], name: &str) -> Option<usize> {
        children.iter().position(|(child, _)| child == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyTree {
    children: Vec<(String, Node)>,
}

impl PropertyTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value at a `/`-delimited path, creating interior nodes.
    ///
    /// A leading `/` is ignored. Fails on empty segments, when a segment
    /// passes through an existing leaf, or when the target already exists.
    pub fn insert(&mut self, path: &str, value: Value) -> Result<()> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let segments: Vec<&str> = trimmed.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(Error::EmptyPathSegment {
                path: path.to_string(),
            });
        }
        self.insert_segments(&segments, value)
            .map_err(|_| Error::StructuralConflict {
                path: path.to_string(),
            })
    }

    fn insert_segments(&mut self, segments: &[&str], value: Value) -> std::result::Result<(), ()> {
        let Some((last, interior)) = segments.split_last() else {
            return Err(());
        };

        let mut children = &mut self.children;
        for segment in interior {
            let index = match Node::child_index(children, segment) {
                Some(index) => index,
                None => {
                    children.push((segment.to_string(), Node::Interior(Vec::new())));
                    children.len() - 1
                }
            };
            children = match &mut children[index].1 {
                Node::Interior(grandchildren) => grandchildren,
                Node::Leaf(_) => return Err(()),
            };
        }

        if Node::child_index(children, last).is_some() {
            return Err(());
        }
        children.push((last.to_string(), Node::Leaf(value)));
        Ok(())
    }

    /// Look up the leaf at a path
    pub fn get(&self, path: &str) -> Option<&Value> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let mut children = &self.children;
        let mut segments = trimmed.split('/').peekable();
        while let Some(segment) = segments.next() {
            let (_, node) = children.iter().find(|(name, _)| name == segment)?;
            match (node, segments.peek()) {
                (Node::Leaf(value), None) => return Some(value),
                (Node::Interior(next), Some(_)) => children = next,
                _ => return None,
            }
        }
        None
    }

    /// Top-level nodes in insertion order
    pub fn children(&self) -> &[(String, Node)] {
        &self.children
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_creates_interior_nodes() {
        let mut tree = PropertyTree::new();
        tree.insert("a/b", Value::from(1)).unwrap();
        tree.insert("/a/c", Value::from(2)).unwrap();
        tree.insert("d", Value::from(3)).unwrap();

        assert_eq!(tree.get("a/b"), Some(&Value::from(1)));
        assert_eq!(tree.get("a/c"), Some(&Value::from(2)));
        assert_eq!(tree.get("a"), None);
        assert_eq!(tree.children().len(), 2);
    }

    #[test]
    fn test_structural_conflicts() {
        let mut tree = PropertyTree::new();
        tree.insert("a/b", Value::from(1)).unwrap();

        assert!(matches!(
            tree.insert("a/b", Value::from(2)),
            Err(Error::StructuralConflict { .. })
        ));
        assert!(matches!(
            tree.insert("a/b/c", Value::from(2)),
            Err(Error::StructuralConflict { .. })
        ));
        assert!(matches!(
            tree.insert("a", Value::from(2)),
            Err(Error::StructuralConflict { .. })
        ));
        assert!(matches!(
            tree.insert("a//b", Value::from(2)),
            Err(Error::EmptyPathSegment { .. })
        ));
        assert_eq!(tree.get("a/b"), Some(&Value::from(1)));
    }
}
