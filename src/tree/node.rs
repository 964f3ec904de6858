//! Tree node implementation.
//!
//! Children own their subtrees; the parent link is a non-owning weak
//! back-reference used for upward traversal only, so no reference cycles
//! are formed.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::error::{Result, TollgateError};

/// A position in a rooted tree, optionally carrying a value.
///
/// `Node` is a cheap handle (`Arc` inner); cloning it clones the handle,
/// not the subtree. Sibling names are unique under one parent, and only
/// the root may lack a value.
pub struct Node<T> {
    inner: Arc<NodeInner<T>>,
}

struct NodeInner<T> {
    name: String,
    value: Option<T>,
    parent: Weak<NodeInner<T>>,
    children: RwLock<Vec<Node<T>>>,
}

impl<T> Clone for Node<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Node<T> {
    /// Create a detached, value-less root node.
    pub fn new_root(name: impl Into<String>) -> Self {
        Self::detached(name.into(), None)
    }

    /// Create a value-carrying child attached under `parent`.
    ///
    /// Fails if a sibling of the same name already exists.
    pub fn of(name: impl Into<String>, value: T, parent: &Node<T>) -> Result<Node<T>> {
        let name = name.into();
        let child = Node {
            inner: Arc::new(NodeInner {
                name,
                value: Some(value),
                parent: Arc::downgrade(&parent.inner),
                children: RwLock::new(Vec::new()),
            }),
        };
        parent.attach(child.clone())?;
        Ok(child)
    }

    fn detached(name: String, value: Option<T>) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                name,
                value,
                parent: Weak::new(),
                children: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Append `child` to this node's children list.
    ///
    /// The child must have been constructed with this node as its parent;
    /// anything else is a programming-contract violation, not a
    /// recoverable error.
    fn attach(&self, child: Node<T>) -> Result<()> {
        assert!(
            Weak::ptr_eq(&child.inner.parent, &Arc::downgrade(&self.inner)),
            "child '{}' declares a different parent than the receiving node '{}'",
            child.name(),
            self.name(),
        );
        let mut children = self.inner.children.write();
        if children.iter().any(|c| c.name() == child.name()) {
            return Err(TollgateError::Node(format!(
                "node '{}' already has a child named '{}'",
                self.name(),
                child.name(),
            )));
        }
        children.push(child);
        Ok(())
    }

    /// The node's name, unique among its siblings.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The node's value; `None` only for the root.
    pub fn value(&self) -> Option<&T> {
        self.inner.value.as_ref()
    }

    /// The parent node, if this node is not the root.
    pub fn parent(&self) -> Option<Node<T>> {
        self.inner.parent.upgrade().map(|inner| Node { inner })
    }

    /// Snapshot of the direct children, in insertion order.
    pub fn children(&self) -> Vec<Node<T>> {
        self.inner.children.read().clone()
    }

    pub fn is_root(&self) -> bool {
        self.inner.parent.upgrade().is_none()
    }

    pub fn is_leaf(&self) -> bool {
        self.inner.children.read().is_empty()
    }

    /// Walk parent links up to the root of the tree.
    pub fn root(&self) -> Node<T> {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// Two handles designate the same node.
    pub fn ptr_eq(&self, other: &Node<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Depth-first search over this node's descendants (not the node
    /// itself) for the first node satisfying `predicate`.
    pub fn find_first_child<P>(&self, predicate: P) -> Option<Node<T>>
    where
        P: Fn(&Node<T>) -> bool,
    {
        fn search<T, P: Fn(&Node<T>) -> bool>(node: &Node<T>, predicate: &P) -> Option<Node<T>> {
            for child in node.children() {
                if predicate(&child) {
                    return Some(child);
                }
                if let Some(found) = search(&child, predicate) {
                    return Some(found);
                }
            }
            None
        }
        search(self, &predicate)
    }

    /// Visit this node and every descendant, depth-first, parents before
    /// children.
    pub fn visit_all<F>(&self, consumer: &mut F)
    where
        F: FnMut(&Node<T>),
    {
        consumer(self);
        for child in self.children() {
            child.visit_all(consumer);
        }
    }

    /// Total number of nodes in this subtree, including self.
    pub fn size(&self) -> usize {
        let mut count = 0;
        self.visit_all(&mut |_| count += 1);
        count
    }
}

impl<T: Clone> Node<T> {
    /// Deep-clone this subtree and graft the copy under `new_parent`.
    ///
    /// Used to carry rate nodes collected under one grouping scope over to
    /// another without re-deriving them. Value-less nodes (the root)
    /// cannot be grafted.
    pub fn copy_to(&self, new_parent: &Node<T>) -> Result<Node<T>> {
        let value = self.inner.value.clone().ok_or_else(|| {
            TollgateError::Node(format!("cannot graft value-less node '{}'", self.name()))
        })?;
        let copy = Node::of(self.name(), value, new_parent)?;
        for child in self.children() {
            child.copy_to(&copy)?;
        }
        Ok(copy)
    }
}

impl<T> Node<T> {
    /// Produce a structurally identical tree with transformed names and
    /// values, leaving this tree untouched. A value-less root stays
    /// value-less.
    pub fn transform<U, N, V>(&self, name_fn: &N, value_fn: &V) -> Node<U>
    where
        N: Fn(&Node<T>) -> String,
        V: Fn(&Node<T>, &T) -> U,
    {
        self.try_transform(name_fn, &|node, value| Ok(value_fn(node, value)))
            .expect("infallible transform")
    }

    /// Fallible variant of [`transform`](Self::transform).
    pub fn try_transform<U, N, V>(&self, name_fn: &N, value_fn: &V) -> Result<Node<U>>
    where
        N: Fn(&Node<T>) -> String,
        V: Fn(&Node<T>, &T) -> Result<U>,
    {
        let value = match self.value() {
            Some(value) => Some(value_fn(self, value)?),
            None => None,
        };
        let transformed = Node::detached(name_fn(self), value);
        self.transform_children(&transformed, name_fn, value_fn)?;
        Ok(transformed)
    }

    fn transform_children<U, N, V>(
        &self,
        target: &Node<U>,
        name_fn: &N,
        value_fn: &V,
    ) -> Result<()>
    where
        N: Fn(&Node<T>) -> String,
        V: Fn(&Node<T>, &T) -> Result<U>,
    {
        for child in self.children() {
            let value = child.value().ok_or_else(|| {
                TollgateError::Node(format!("non-root node '{}' lacks a value", child.name()))
            })?;
            let mapped = Node::of(name_fn(&child), value_fn(&child, value)?, target)?;
            child.transform_children(&mapped, name_fn, value_fn)?;
        }
        Ok(())
    }
}

impl<T> fmt::Debug for Node<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.inner.name)
            .field("children", &self.inner.children.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> Node<u32> {
        let root = Node::new_root("root");
        let a = Node::of("a", 1, &root).unwrap();
        Node::of("a1", 11, &a).unwrap();
        Node::of("a2", 12, &a).unwrap();
        Node::of("b", 2, &root).unwrap();
        root
    }

    #[test]
    fn test_root_has_no_value_or_parent() {
        let root = Node::<u32>::new_root("root");
        assert!(root.is_root());
        assert!(root.value().is_none());
        assert!(root.parent().is_none());
    }

    #[test]
    fn test_child_linked_to_parent() {
        let root = Node::new_root("root");
        let child = Node::of("child", 7, &root).unwrap();
        assert_eq!(child.value(), Some(&7));
        assert!(child.parent().unwrap().ptr_eq(&root));
        assert!(child.root().ptr_eq(&root));
        assert!(child.is_leaf());
        assert!(!root.is_leaf());
    }

    #[test]
    fn test_sibling_name_collision_rejected() {
        let root = Node::new_root("root");
        Node::of("dup", 1, &root).unwrap();
        let err = Node::of("dup", 2, &root).unwrap_err();
        assert!(matches!(err, TollgateError::Node(_)));
    }

    #[test]
    fn test_visit_all_is_depth_first_parent_before_children() {
        let root = sample_tree();
        let mut names = Vec::new();
        root.visit_all(&mut |node| names.push(node.name().to_string()));
        assert_eq!(names, vec!["root", "a", "a1", "a2", "b"]);
    }

    #[test]
    fn test_find_first_child_searches_descendants() {
        let root = sample_tree();
        let found = root.find_first_child(|n| n.value() == Some(&12)).unwrap();
        assert_eq!(found.name(), "a2");
        assert!(root.find_first_child(|n| n.name() == "missing").is_none());
    }

    #[test]
    fn test_find_first_child_excludes_self() {
        let root = sample_tree();
        assert!(root.find_first_child(|n| n.name() == "root").is_none());
    }

    #[test]
    fn test_copy_to_grafts_deep_clone() {
        let root = sample_tree();
        let a = root.find_first_child(|n| n.name() == "a").unwrap();
        let b = root.find_first_child(|n| n.name() == "b").unwrap();

        let grafted = a.copy_to(&b).unwrap();
        assert!(grafted.parent().unwrap().ptr_eq(&b));
        assert_eq!(grafted.size(), 3);
        // the original subtree is untouched
        assert!(a.parent().unwrap().ptr_eq(&root));
        assert_eq!(root.size(), 8);
    }

    #[test]
    fn test_copy_root_is_rejected() {
        let root = sample_tree();
        let other = Node::new_root("other");
        assert!(root.copy_to(&other).is_err());
    }

    #[test]
    fn test_transform_preserves_structure() {
        let root = sample_tree();
        let doubled = root.transform(&|n| n.name().to_string(), &|_, v| v * 2);
        assert_eq!(doubled.size(), root.size());
        assert!(doubled.value().is_none());
        let a1 = doubled.find_first_child(|n| n.name() == "a1").unwrap();
        assert_eq!(a1.value(), Some(&22));
        // originals untouched
        let orig = root.find_first_child(|n| n.name() == "a1").unwrap();
        assert_eq!(orig.value(), Some(&11));
    }

    #[test]
    fn test_try_transform_propagates_errors() {
        let root = sample_tree();
        let result: Result<Node<u32>> = root.try_transform(&|n| n.name().to_string(), &|_, v| {
            if *v == 12 {
                Err(TollgateError::Config("boom".into()))
            } else {
                Ok(*v)
            }
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_size_counts_subtree() {
        let root = sample_tree();
        assert_eq!(root.size(), 5);
        let a = root.find_first_child(|n| n.name() == "a").unwrap();
        assert_eq!(a.size(), 3);
    }
}
