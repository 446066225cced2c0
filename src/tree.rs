//! Parameter trees: nested, ordered collections of dense tensors.
//!
//! A [`Tree`] is flattened into its leaves in a fixed depth-first order
//! (sequence order, then insertion order of named entries) together with a
//! [`TreeDef`] describing the structure. [`TreeDef::unflatten`] is the strict
//! inverse: it rebuilds the identical tree from leaves of matching shape.
//!
//! The implicit engine works on the concatenation of all leaf values, so the
//! value-level pair [`Tree::flatten_values`] / [`TreeDef::unflatten_values`]
//! is what most callers use.
//!
//! ```
//! use metagrad::tree::{Tensor, Tree};
//!
//! let tree = Tree::map(vec![
//!     ("w", Tree::Leaf(Tensor::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap())),
//!     ("b", Tree::Leaf(Tensor::from_vec(vec![0.5, -0.5]))),
//! ])
//! .unwrap();
//! let (values, def) = tree.flatten_values();
//! assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0, 0.5, -0.5]);
//! assert_eq!(def.unflatten_values(&values).unwrap(), tree);
//! ```

use std::ops::Range;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::TreeError;

/// Dense row-major tensor.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Tensor<F> {
    shape: Vec<usize>,
    data: Vec<F>,
}

impl<F> Tensor<F> {
    /// Create a tensor, checking that `data` fills `shape` exactly.
    pub fn new(shape: Vec<usize>, data: Vec<F>) -> Result<Self, TreeError> {
        let expected = shape.iter().product();
        if data.len() != expected {
            return Err(TreeError::TensorSize {
                shape,
                expected,
                got: data.len(),
            });
        }
        Ok(Tensor { shape, data })
    }

    /// A rank-1 tensor.
    pub fn from_vec(data: Vec<F>) -> Self {
        Tensor {
            shape: vec![data.len()],
            data,
        }
    }

    /// A rank-0 tensor.
    pub fn scalar(value: F) -> Self {
        Tensor {
            shape: Vec::new(),
            data: vec![value],
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[F] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [F] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<F> {
        self.data
    }

    /// Number of elements.
    pub fn numel(&self) -> usize {
        self.data.len()
    }
}

impl<F: Clone + num_traits::Zero> Tensor<F> {
    /// A zero-filled tensor of the given shape.
    pub fn zeros(shape: Vec<usize>) -> Self {
        let n = shape.iter().product();
        Tensor {
            shape,
            data: vec![F::zero(); n],
        }
    }
}

/// A nested structure of tensors.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Tree<F> {
    Leaf(Tensor<F>),
    /// Positional children.
    Seq(Vec<Tree<F>>),
    /// Named children, kept in insertion order.
    Map(Vec<(String, Tree<F>)>),
}

/// Structure of a flattened [`Tree`]: everything except the leaf values.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TreeDef {
    Leaf(Vec<usize>),
    Seq(Vec<TreeDef>),
    Map(Vec<(String, TreeDef)>),
}

impl<F> Tree<F> {
    /// Build a [`Tree::Map`], rejecting duplicate names.
    pub fn map<S: Into<String>>(entries: Vec<(S, Tree<F>)>) -> Result<Self, TreeError> {
        let mut out: Vec<(String, Tree<F>)> = Vec::with_capacity(entries.len());
        for (name, child) in entries {
            let name = name.into();
            if out.iter().any(|(n, _)| *n == name) {
                return Err(TreeError::DuplicateName(name));
            }
            out.push((name, child));
        }
        Ok(Tree::Map(out))
    }

    /// Look up a named child of a [`Tree::Map`].
    pub fn get(&self, name: &str) -> Option<&Tree<F>> {
        match self {
            Tree::Map(entries) => entries.iter().find(|(n, _)| n == name).map(|(_, t)| t),
            _ => None,
        }
    }

    /// Leaves in flatten order, by reference.
    pub fn leaves(&self) -> Vec<&Tensor<F>> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Tensor<F>>) {
        match self {
            Tree::Leaf(t) => out.push(t),
            Tree::Seq(children) => children.iter().for_each(|c| c.collect_leaves(out)),
            Tree::Map(entries) => entries.iter().for_each(|(_, c)| c.collect_leaves(out)),
        }
    }

    /// Split the tree into its leaves and its structure.
    pub fn flatten(self) -> (Vec<Tensor<F>>, TreeDef) {
        let mut leaves = Vec::new();
        let def = self.flatten_into(&mut leaves);
        (leaves, def)
    }

    fn flatten_into(self, leaves: &mut Vec<Tensor<F>>) -> TreeDef {
        match self {
            Tree::Leaf(t) => {
                let def = TreeDef::Leaf(t.shape.clone());
                leaves.push(t);
                def
            }
            Tree::Seq(children) => TreeDef::Seq(
                children
                    .into_iter()
                    .map(|c| c.flatten_into(leaves))
                    .collect(),
            ),
            Tree::Map(entries) => TreeDef::Map(
                entries
                    .into_iter()
                    .map(|(n, c)| (n, c.flatten_into(leaves)))
                    .collect(),
            ),
        }
    }
}

impl<F: Clone> Tree<F> {
    /// Concatenate all leaf values in flatten order.
    pub fn flatten_values(&self) -> (Vec<F>, TreeDef) {
        let (leaves, def) = self.clone().flatten();
        let values = leaves.into_iter().flat_map(Tensor::into_data).collect();
        (values, def)
    }
}

impl TreeDef {
    /// Number of leaves.
    pub fn num_leaves(&self) -> usize {
        match self {
            TreeDef::Leaf(_) => 1,
            TreeDef::Seq(children) => children.iter().map(TreeDef::num_leaves).sum(),
            TreeDef::Map(entries) => entries.iter().map(|(_, c)| c.num_leaves()).sum(),
        }
    }

    /// Total number of scalar elements across all leaves.
    pub fn num_elements(&self) -> usize {
        self.leaf_shapes()
            .iter()
            .map(|s| s.iter().product::<usize>())
            .sum()
    }

    /// Leaf shapes in flatten order.
    pub fn leaf_shapes(&self) -> Vec<&[usize]> {
        let mut out = Vec::new();
        self.collect_shapes(&mut out);
        out
    }

    fn collect_shapes<'a>(&'a self, out: &mut Vec<&'a [usize]>) {
        match self {
            TreeDef::Leaf(shape) => out.push(shape),
            TreeDef::Seq(children) => children.iter().for_each(|c| c.collect_shapes(out)),
            TreeDef::Map(entries) => entries.iter().for_each(|(_, c)| c.collect_shapes(out)),
        }
    }

    /// Range of each leaf inside the flat value vector.
    pub fn leaf_ranges(&self) -> Vec<Range<usize>> {
        let mut start = 0;
        self.leaf_shapes()
            .into_iter()
            .map(|s| {
                let end = start + s.iter().product::<usize>();
                let r = start..end;
                start = end;
                r
            })
            .collect()
    }

    /// Rebuild a tree from leaves. Leaf count and every leaf shape must match.
    pub fn unflatten<F>(&self, leaves: Vec<Tensor<F>>) -> Result<Tree<F>, TreeError> {
        let expected = self.num_leaves();
        if leaves.len() != expected {
            return Err(TreeError::LeafCount {
                expected,
                got: leaves.len(),
            });
        }
        let mut iter = leaves.into_iter().enumerate();
        self.build(&mut iter)
    }

    fn build<F>(
        &self,
        leaves: &mut impl Iterator<Item = (usize, Tensor<F>)>,
    ) -> Result<Tree<F>, TreeError> {
        match self {
            TreeDef::Leaf(shape) => {
                // Count was checked up front.
                let (index, t) = leaves.next().ok_or(TreeError::LeafCount {
                    expected: self.num_leaves(),
                    got: 0,
                })?;
                if t.shape != *shape {
                    return Err(TreeError::LeafShape {
                        index,
                        expected: shape.clone(),
                        got: t.shape,
                    });
                }
                Ok(Tree::Leaf(t))
            }
            TreeDef::Seq(children) => Ok(Tree::Seq(
                children
                    .iter()
                    .map(|c| c.build(&mut *leaves))
                    .collect::<Result<_, _>>()?,
            )),
            TreeDef::Map(entries) => Ok(Tree::Map(
                entries
                    .iter()
                    .map(|(n, c)| Ok((n.clone(), c.build(&mut *leaves)?)))
                    .collect::<Result<_, TreeError>>()?,
            )),
        }
    }

    /// Rebuild a tree from a flat value vector of length [`num_elements`](Self::num_elements).
    pub fn unflatten_values<F: Clone>(&self, values: &[F]) -> Result<Tree<F>, TreeError> {
        let expected = self.num_elements();
        if values.len() != expected {
            return Err(TreeError::ValueCount {
                expected,
                got: values.len(),
            });
        }
        let leaves = self
            .leaf_shapes()
            .into_iter()
            .zip(self.leaf_ranges())
            .map(|(shape, r)| Tensor {
                shape: shape.to_vec(),
                data: values[r].to_vec(),
            })
            .collect();
        self.unflatten(leaves)
    }
}
