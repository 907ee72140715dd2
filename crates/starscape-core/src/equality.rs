#![forbid(unsafe_code)]

//! Change-detection equality.
//!
//! [`ValuesEqual`] decides whether a property update needs to be propagated.
//! It differs from `PartialEq` in a few places:
//!
//! - NaN equals NaN, so a property stuck at NaN does not re-notify,
//! - lists, tuples and options compare element by element,
//! - shared references (`Rc`) compare by identity, not contents.

use std::rc::Rc;

use crate::vec3::Vec3;

pub trait ValuesEqual {
    fn values_equal(&self, other: &Self) -> bool;
}

/// Free-function form of [`ValuesEqual::values_equal`].
#[must_use]
pub fn values_equal<T: ValuesEqual + ?Sized>(a: &T, b: &T) -> bool {
    a.values_equal(b)
}

macro_rules! eq_values_equal {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ValuesEqual for $ty {
                fn values_equal(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

eq_values_equal!(
    bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, str, String, ()
);

impl ValuesEqual for f64 {
    fn values_equal(&self, other: &Self) -> bool {
        self == other || (self.is_nan() && other.is_nan())
    }
}

impl ValuesEqual for f32 {
    fn values_equal(&self, other: &Self) -> bool {
        self == other || (self.is_nan() && other.is_nan())
    }
}

impl ValuesEqual for Vec3 {
    fn values_equal(&self, other: &Self) -> bool {
        self.x.values_equal(&other.x) && self.y.values_equal(&other.y) && self.z.values_equal(&other.z)
    }
}

impl<T: ValuesEqual> ValuesEqual for [T] {
    fn values_equal(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.values_equal(b))
    }
}

impl<T: ValuesEqual> ValuesEqual for Vec<T> {
    fn values_equal(&self, other: &Self) -> bool {
        self.as_slice().values_equal(other.as_slice())
    }
}

impl<T: ValuesEqual> ValuesEqual for Option<T> {
    fn values_equal(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.values_equal(b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: ValuesEqual + ?Sized> ValuesEqual for &T {
    fn values_equal(&self, other: &Self) -> bool {
        (**self).values_equal(*other)
    }
}

impl<T: ValuesEqual + ?Sized> ValuesEqual for Box<T> {
    fn values_equal(&self, other: &Self) -> bool {
        (**self).values_equal(&**other)
    }
}

/// Shared values are opaque: equal only if they are the same allocation.
impl<T: ?Sized> ValuesEqual for Rc<T> {
    fn values_equal(&self, other: &Self) -> bool {
        Rc::ptr_eq(self, other)
    }
}

impl<A: ValuesEqual, B: ValuesEqual> ValuesEqual for (A, B) {
    fn values_equal(&self, other: &Self) -> bool {
        self.0.values_equal(&other.0) && self.1.values_equal(&other.1)
    }
}

impl<A: ValuesEqual, B: ValuesEqual, C: ValuesEqual> ValuesEqual for (A, B, C) {
    fn values_equal(&self, other: &Self) -> bool {
        self.0.values_equal(&other.0) && self.1.values_equal(&other.1) && self.2.values_equal(&other.2)
    }
}
