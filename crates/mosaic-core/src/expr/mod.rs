//! Index-string tensor expressions
//!
//! Arrays enter expressions through [`DistArray::idx`] with a
//! comma-separated label string: `a.idx("i,k")? * b.idx("k,j")?` builds an
//! expression tree supporting scalar multiplication, negation, addition,
//! subtraction, element-wise products (matching label sets), and
//! contraction (implicit over shared labels). Assigning the tree to a
//! target label order compiles it into a dataflow graph of distributed
//! evaluators and runs it:
//!
//! ```
//! use mosaic_core::array::DistArray;
//! use mosaic_core::tiled_range::TiledRange;
//! use mosaic_runtime::World;
//!
//! let world = World::local();
//! let tr = TiledRange::from_uniform(&[4, 4], &[2, 2]);
//! let a = DistArray::<f64>::new_dense(&world, tr.clone()).unwrap();
//! let b = DistArray::<f64>::new_dense(&world, tr).unwrap();
//! a.fill_local(1.0, false).unwrap();
//! b.fill_local(2.0, false).unwrap();
//!
//! let mut c = DistArray::<f64>::default();
//! c.assign("i,j", a.idx("i,k").unwrap() * b.idx("k,j").unwrap()).unwrap();
//! assert_eq!(c.tile(0).unwrap().data(), &[8.0; 4]);
//! ```

pub(crate) mod engine;

use std::ops;

use mosaic_runtime::World;
use tracing::error;

use crate::array::DistArray;
use crate::error::{Error, Result};
use crate::eval::DistEval;
use crate::permutation::Permutation;
use crate::tensor::Scalar;

/// An ordered list of index labels, parsed from a comma-separated string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariableList {
    vars: Vec<String>,
}

impl VariableList {
    /// Parse `"i,j,k"` into labels, rejecting empty and duplicate labels.
    pub fn parse(labels: &str) -> Result<Self> {
        let vars: Vec<String> = labels
            .split(',')
            .map(|label| label.trim().to_string())
            .collect();
        if vars.iter().any(String::is_empty) {
            return Err(Error::LabelCount {
                labels: labels.to_string(),
                rank: vars.len(),
            });
        }
        for (position, label) in vars.iter().enumerate() {
            if vars[..position].contains(label) {
                return Err(Error::DuplicateLabel(label.clone()));
            }
        }
        Ok(Self { vars })
    }

    pub(crate) fn from_vec(vars: Vec<String>) -> Self {
        Self { vars }
    }

    /// Number of labels.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// `true` for an empty label list.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// The labels, in order.
    pub fn vars(&self) -> &[String] {
        &self.vars
    }

    /// Position of `label`, when present.
    pub fn position(&self, label: &str) -> Option<usize> {
        self.vars.iter().position(|candidate| candidate == label)
    }

    /// `true` when both lists contain the same labels, in any order.
    pub fn same_set(&self, other: &Self) -> bool {
        self.len() == other.len() && self.vars.iter().all(|label| other.position(label).is_some())
    }

    /// The permutation `p` with `p.apply(self.vars) == target.vars`.
    ///
    /// # Errors
    ///
    /// [`Error::IncompatibleLabels`] when the lists are not permutations of
    /// each other.
    pub fn permutation_to(&self, target: &Self) -> Result<Permutation> {
        if !self.same_set(target) {
            return Err(Error::IncompatibleLabels {
                left: self.vars.clone(),
                right: target.vars.clone(),
            });
        }
        let image = self
            .vars
            .iter()
            .map(|label| target.position(label).expect("same label set"))
            .collect();
        Ok(Permutation::new(image).expect("label positions form a bijection"))
    }

    /// Labels present in both lists, in this list's order.
    pub fn common(&self, other: &Self) -> Vec<String> {
        self.vars
            .iter()
            .filter(|label| other.position(label).is_some())
            .cloned()
            .collect()
    }

    /// Labels of this list absent from `other`, in this list's order.
    pub fn minus(&self, other: &Self) -> Vec<String> {
        self.vars
            .iter()
            .filter(|label| other.position(label).is_none())
            .cloned()
            .collect()
    }
}

impl std::fmt::Display for VariableList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.vars.join(","))
    }
}

/// A labelled array reference: one leaf of an expression tree.
pub struct TsrExpr<T: Scalar> {
    pub(crate) array: DistArray<T>,
    pub(crate) vars: VariableList,
}

/// A tensor expression tree.
///
/// Built from labelled arrays with the usual operators; `Mult` resolves to
/// a Hadamard product when the operand label sets coincide and to a
/// contraction over the shared labels otherwise.
pub enum Expr<T: Scalar> {
    Tsr(TsrExpr<T>),
    Scale { arg: Box<Expr<T>>, factor: T },
    Add { left: Box<Expr<T>>, right: Box<Expr<T>> },
    Subt { left: Box<Expr<T>>, right: Box<Expr<T>> },
    Mult { left: Box<Expr<T>>, right: Box<Expr<T>> },
}

impl<T: Scalar> Expr<T> {
    /// The natural label order this node produces.
    pub fn vars(&self) -> Result<VariableList> {
        match self {
            Expr::Tsr(leaf) => Ok(leaf.vars.clone()),
            Expr::Scale { arg, .. } => arg.vars(),
            Expr::Add { left, right } | Expr::Subt { left, right } => {
                let left_vars = left.vars()?;
                let right_vars = right.vars()?;
                if !left_vars.same_set(&right_vars) {
                    return Err(Error::IncompatibleLabels {
                        left: left_vars.vars().to_vec(),
                        right: right_vars.vars().to_vec(),
                    });
                }
                Ok(left_vars)
            }
            Expr::Mult { left, right } => {
                let left_vars = left.vars()?;
                let right_vars = right.vars()?;
                if left_vars.same_set(&right_vars) {
                    return Ok(left_vars);
                }
                let other = VariableList::from_vec(right_vars.minus(&left_vars));
                let mut vars = left_vars.minus(&right_vars);
                vars.extend(other.vars().iter().cloned());
                Ok(VariableList::from_vec(vars))
            }
        }
    }

    /// The world of the expression's leaves.
    pub fn world(&self) -> World {
        match self {
            Expr::Tsr(leaf) => leaf.array.world().clone(),
            Expr::Scale { arg, .. } => arg.world(),
            Expr::Add { left, .. } | Expr::Subt { left, .. } | Expr::Mult { left, .. } => {
                left.world()
            }
        }
    }

    /// Multiply by a scalar, folding repeated scalings.
    pub fn scale(self, factor: T) -> Self {
        match self {
            Expr::Scale { arg, factor: prior } => Expr::Scale {
                arg,
                factor: prior * factor,
            },
            other => Expr::Scale {
                arg: Box::new(other),
                factor,
            },
        }
    }

    /// Evaluate into a fresh array with the target label order. Collective:
    /// every rank must evaluate the matching expression. Blocks until this
    /// rank's tiles are produced.
    pub fn eval_into(self, target_labels: &str) -> Result<DistArray<T>> {
        let target = VariableList::parse(target_labels)?;
        let world = self.world();
        let plan = engine::propagate_vars(self, &target)?;
        let root = engine::realize(plan, &world, None)?;
        root.clone().eval()?;

        let dest = DistArray::new(
            &world,
            root.trange().clone(),
            root.shape().clone(),
            Some(root.pmap().clone()),
        )?;
        let pimpl = dest.pimpl()?;
        for ord in pimpl.local_nonzero() {
            pimpl.set_future(ord, root.fetch(ord))?;
        }
        root.wait()?;
        Ok(dest)
    }
}

impl<T: Scalar> ops::Add for Expr<T> {
    type Output = Expr<T>;

    fn add(self, rhs: Expr<T>) -> Expr<T> {
        Expr::Add {
            left: Box::new(self),
            right: Box::new(rhs),
        }
    }
}

impl<T: Scalar> ops::Sub for Expr<T> {
    type Output = Expr<T>;

    fn sub(self, rhs: Expr<T>) -> Expr<T> {
        Expr::Subt {
            left: Box::new(self),
            right: Box::new(rhs),
        }
    }
}

impl<T: Scalar> ops::Mul for Expr<T> {
    type Output = Expr<T>;

    /// Element-wise product when the label sets match, contraction over the
    /// shared labels otherwise.
    fn mul(self, rhs: Expr<T>) -> Expr<T> {
        Expr::Mult {
            left: Box::new(self),
            right: Box::new(rhs),
        }
    }
}

impl<T: Scalar> ops::Mul<T> for Expr<T> {
    type Output = Expr<T>;

    fn mul(self, factor: T) -> Expr<T> {
        self.scale(factor)
    }
}

impl<T: Scalar> ops::Neg for Expr<T> {
    type Output = Expr<T>;

    fn neg(self) -> Expr<T> {
        self.scale(T::zero() - T::one())
    }
}

impl<T: Scalar> DistArray<T> {
    /// Label this array for use in a tensor expression.
    ///
    /// # Errors
    ///
    /// [`Error::LabelCount`] when the number of labels differs from the
    /// array rank; the mismatch is reported on rank 0.
    pub fn idx(&self, labels: &str) -> Result<Expr<T>> {
        let vars = VariableList::parse(labels)?;
        let pimpl = self.pimpl()?;
        if vars.len() != pimpl.trange().rank() {
            if pimpl.world().rank() == 0 {
                error!(
                    labels,
                    rank = pimpl.trange().rank(),
                    "the number of index labels does not equal the array rank"
                );
            }
            return Err(Error::LabelCount {
                labels: labels.to_string(),
                rank: pimpl.trange().rank(),
            });
        }
        Ok(Expr::Tsr(TsrExpr {
            array: self.clone(),
            vars,
        }))
    }

    /// Evaluate `expr` into this array with the given target label order.
    ///
    /// The previous contents (if any) are released through the usual lazy
    /// cleanup; an uninitialized handle becomes initialized.
    pub fn assign(&mut self, target_labels: &str, expr: Expr<T>) -> Result<()> {
        *self = expr.eval_into(target_labels)?;
        Ok(())
    }
}
