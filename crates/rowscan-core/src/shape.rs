//! Row shapes.
//!
//! Every row a materializer collects must agree on one shape. For static
//! Rust types that is guaranteed by the compiler and the shape is just
//! [`Shape::Static`]; dynamic rows built by the codec carry their column
//! kinds, and a null column acts as a wildcard that later rows refine.

use chrono::NaiveDateTime;

use crate::codec::{Kind, Record};
use crate::value::Value;

/// The shape of one decoded row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    /// A statically typed row.
    Static,
    /// A single dynamic value. `None` means null so far.
    Scalar(Option<Kind>),
    /// Positional dynamic values.
    Tuple(Vec<Option<Kind>>),
    /// Named dynamic values, in key order.
    Keyed(Vec<(String, Option<Kind>)>),
}

impl Shape {
    /// Folds `other` into this shape, filling in kinds that were null.
    ///
    /// Returns false if the shapes disagree; `self` is left unchanged then.
    pub fn unify(&mut self, other: &Shape) -> bool {
        if !self.accepts(other) {
            return false;
        }
        match (self, other) {
            (Shape::Scalar(a), Shape::Scalar(b)) => refine(a, *b),
            (Shape::Tuple(a), Shape::Tuple(b)) => {
                for (x, y) in a.iter_mut().zip(b) {
                    refine(x, *y);
                }
            }
            (Shape::Keyed(a), Shape::Keyed(b)) => {
                for ((_, x), (_, y)) in a.iter_mut().zip(b) {
                    refine(x, *y);
                }
            }
            _ => {}
        }
        true
    }

    /// Returns true if a row of shape `other` may join rows of this shape.
    pub fn accepts(&self, other: &Shape) -> bool {
        match (self, other) {
            (Shape::Static, Shape::Static) => true,
            (Shape::Scalar(a), Shape::Scalar(b)) => compatible(*a, *b),
            (Shape::Tuple(a), Shape::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| compatible(*x, *y))
            }
            (Shape::Keyed(a), Shape::Keyed(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, x), (kb, y))| ka == kb && compatible(*x, *y))
            }
            _ => false,
        }
    }
}

fn compatible(a: Option<Kind>, b: Option<Kind>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

fn refine(slot: &mut Option<Kind>, other: Option<Kind>) {
    if slot.is_none() {
        *slot = other;
    }
}

/// Reports the shape of a decoded row.
///
/// Statically typed rows can rely on the default:
///
/// ```
/// use rowscan_core::Shaped;
///
/// struct User {
///     id: i64,
///     name: String,
/// }
///
/// impl Shaped for User {}
/// ```
pub trait Shaped {
    /// Returns the row's shape, or `None` if the row is absent.
    fn shape(&self) -> Option<Shape> {
        Some(Shape::Static)
    }
}

impl<T: Shaped> Shaped for Option<T> {
    fn shape(&self) -> Option<Shape> {
        self.as_ref().and_then(Shaped::shape)
    }
}

impl<T: Shaped + ?Sized> Shaped for Box<T> {
    fn shape(&self) -> Option<Shape> {
        (**self).shape()
    }
}

impl Shaped for Value {
    fn shape(&self) -> Option<Shape> {
        Some(Shape::Scalar(self.kind()))
    }
}

impl Shaped for Vec<Value> {
    fn shape(&self) -> Option<Shape> {
        if self.is_empty() {
            return None;
        }
        Some(Shape::Tuple(self.iter().map(Value::kind).collect()))
    }
}

impl Shaped for Record {
    fn shape(&self) -> Option<Shape> {
        if self.is_empty() {
            return None;
        }
        Some(Shape::Keyed(
            self.iter().map(|(k, v)| (k.clone(), v.kind())).collect(),
        ))
    }
}

macro_rules! impl_static_shape {
    ($($t:ty),* $(,)?) => {
        $(impl Shaped for $t {})*
    };
}

impl_static_shape!(
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    u64,
    f32,
    f64,
    String,
    Vec<u8>,
    NaiveDateTime,
);

macro_rules! impl_tuple_shape {
    ($($name:ident),+) => {
        impl<$($name),+> Shaped for ($($name,)+) {}
    };
}

impl_tuple_shape!(A);
impl_tuple_shape!(A, B);
impl_tuple_shape!(A, B, C);
impl_tuple_shape!(A, B, C, D);
impl_tuple_shape!(A, B, C, D, E);
impl_tuple_shape!(A, B, C, D, E, F);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_is_refined() {
        let mut shape = vec![Value::Int64(1), Value::Null].shape().unwrap();
        let next = vec![Value::Int64(2), Value::Text("x".into())].shape().unwrap();
        assert!(shape.unify(&next));
        assert_eq!(
            shape,
            Shape::Tuple(vec![Some(Kind::Int64), Some(Kind::Text)])
        );

        let conflicting = vec![Value::Int64(3), Value::Int64(4)].shape().unwrap();
        assert!(!shape.unify(&conflicting));
    }

    #[test]
    fn test_arity_mismatch() {
        let shape = vec![Value::Int64(1)].shape().unwrap();
        let wider = vec![Value::Int64(1), Value::Int64(2)].shape().unwrap();
        assert!(!shape.accepts(&wider));
    }

    #[test]
    fn test_keyed_names_must_match() {
        let mut a = Record::new();
        a.insert("id".into(), Value::Int64(1));
        let mut b = Record::new();
        b.insert("uid".into(), Value::Int64(1));
        assert!(!a.shape().unwrap().accepts(&b.shape().unwrap()));
    }

    #[test]
    fn test_absent_rows() {
        assert_eq!(None::<i64>.shape(), None);
        assert_eq!(Vec::<Value>::new().shape(), None);
        assert_eq!(Some(5i64).shape(), Some(Shape::Static));
    }

    #[test]
    fn test_static_never_mixes_with_dynamic() {
        assert!(!Shape::Static.accepts(&Shape::Scalar(None)));
    }
}
