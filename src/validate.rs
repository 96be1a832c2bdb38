//
// validate.rs
// Dicom-Scans-rs
//
// Explicit per-function validation specs: named parameters carry ordered constraint lists that are checked before the wrapped function runs.
//
// Thales Matheus Mendonça Santos - October 2026

use std::collections::BTreeMap;
use std::fmt::Debug;

use ndarray::{ArrayBase, Data, Dimension};

use crate::error::{ValidationError, Violation};

/// A single post-check applied to an argument of type `T`.
pub trait Constraint<T: ?Sized>: Send + Sync {
    /// Short label reported alongside a failure, e.g. `ndim(3)`.
    fn describe(&self) -> String;

    fn check(&self, value: &T) -> Result<(), String>;
}

/// Named parameter with its constraints, evaluated in declaration order.
pub struct Param<T: ?Sized> {
    name: &'static str,
    constraints: Vec<Box<dyn Constraint<T>>>,
}

impl<T: ?Sized> Param<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            constraints: Vec::new(),
        }
    }

    pub fn check(mut self, constraint: impl Constraint<T> + 'static) -> Self {
        self.constraints.push(Box::new(constraint));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// First violated constraint, if any.
    pub fn evaluate(&self, value: &T) -> Option<Violation> {
        self.constraints.iter().find_map(|constraint| {
            constraint.check(value).err().map(|message| Violation {
                parameter: self.name.to_string(),
                constraint: constraint.describe(),
                message,
            })
        })
    }
}

/// Spec covering a whole argument tuple.
pub trait ArgSpec<Args> {
    /// One violation per failing parameter; every parameter is visited.
    fn violations(&self, args: &Args) -> Vec<Violation>;
}

/// Something that can be called with an argument tuple.
pub trait Invoke<Args> {
    type Output;

    fn invoke(&self, args: Args) -> Self::Output;
}

/// A function gated behind its validation spec.
pub struct Validated<F, S> {
    func: F,
    spec: S,
}

impl<F, S> Validated<F, S> {
    pub fn new(func: F, spec: S) -> Self {
        Self { func, spec }
    }

    pub fn spec(&self) -> &S {
        &self.spec
    }

    pub fn validate<Args>(&self, args: &Args) -> Result<(), ValidationError>
    where
        S: ArgSpec<Args>,
    {
        let violations = self.spec.violations(args);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(violations))
        }
    }
}

macro_rules! impl_arity {
    ($($ty:ident $val:ident $idx:tt),+) => {
        impl<$($ty),+> ArgSpec<($($ty,)+)> for ($(Param<$ty>,)+) {
            fn violations(&self, args: &($($ty,)+)) -> Vec<Violation> {
                let mut found = Vec::new();
                $(
                    if let Some(violation) = self.$idx.evaluate(&args.$idx) {
                        found.push(violation);
                    }
                )+
                found
            }
        }

        impl<Func, Ret, $($ty),+> Invoke<($($ty,)+)> for Validated<Func, ($(Param<$ty>,)+)>
        where
            Func: Fn($($ty),+) -> Ret,
        {
            type Output = Result<Ret, ValidationError>;

            fn invoke(&self, args: ($($ty,)+)) -> Self::Output {
                self.validate(&args)?;
                let ($($val,)+) = args;
                Ok((self.func)($($val),+))
            }
        }
    };
}

impl_arity!(A a 0);
impl_arity!(A a 0, B b 1);
impl_arity!(A a 0, B b 1, C c 2);
impl_arity!(A a 0, B b 1, C c 2, D d 3);

/// Types exposing an n-dimensional shape.
pub trait Shaped {
    fn dims(&self) -> Vec<usize>;
}

impl<S: Data, D: Dimension> Shaped for ArrayBase<S, D> {
    fn dims(&self) -> Vec<usize> {
        self.shape().to_vec()
    }
}

impl<T: Shaped + ?Sized> Shaped for &T {
    fn dims(&self) -> Vec<usize> {
        (**self).dims()
    }
}

/// Types with a length.
pub trait HasLen {
    fn length(&self) -> usize;
}

impl HasLen for str {
    fn length(&self) -> usize {
        self.len()
    }
}

impl HasLen for String {
    fn length(&self) -> usize {
        self.len()
    }
}

impl<T> HasLen for [T] {
    fn length(&self) -> usize {
        self.len()
    }
}

impl<T> HasLen for Vec<T> {
    fn length(&self) -> usize {
        self.len()
    }
}

impl<K, V> HasLen for BTreeMap<K, V> {
    fn length(&self) -> usize {
        self.len()
    }
}

impl<T: HasLen + ?Sized> HasLen for &T {
    fn length(&self) -> usize {
        (**self).length()
    }
}

/// Types whose elements can be inspected as a flat sequence of numbers.
pub trait Numbers {
    fn numbers(&self) -> Vec<f64>;
}

impl<const N: usize> Numbers for [f64; N] {
    fn numbers(&self) -> Vec<f64> {
        self.to_vec()
    }
}

impl Numbers for [f64] {
    fn numbers(&self) -> Vec<f64> {
        self.to_vec()
    }
}

impl Numbers for Vec<f64> {
    fn numbers(&self) -> Vec<f64> {
        self.clone()
    }
}

impl<S, D> Numbers for ArrayBase<S, D>
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    fn numbers(&self) -> Vec<f64> {
        self.iter().map(|v| f64::from(*v)).collect()
    }
}

impl<T: Numbers + ?Sized> Numbers for &T {
    fn numbers(&self) -> Vec<f64> {
        (**self).numbers()
    }
}

pub struct Ndim(Vec<usize>);

/// Array must have exactly `n` dimensions.
pub fn ndim(n: usize) -> Ndim {
    Ndim(vec![n])
}

/// Array must have any of the listed dimensionalities.
pub fn ndim_in(allowed: &[usize]) -> Ndim {
    Ndim(allowed.to_vec())
}

impl<T: Shaped + ?Sized> Constraint<T> for Ndim {
    fn describe(&self) -> String {
        match self.0.as_slice() {
            [n] => format!("ndim({n})"),
            many => format!("ndim_in({many:?})"),
        }
    }

    fn check(&self, value: &T) -> Result<(), String> {
        let got = value.dims().len();
        if self.0.contains(&got) {
            Ok(())
        } else if self.0.len() == 1 {
            Err(format!("expected {} dimensions, got {}", self.0[0], got))
        } else {
            Err(format!("expected {:?} dimensions, got {}", self.0, got))
        }
    }
}

pub struct Shape(Vec<usize>);

/// Array must have exactly this shape.
pub fn shape(expected: &[usize]) -> Shape {
    Shape(expected.to_vec())
}

impl<T: Shaped + ?Sized> Constraint<T> for Shape {
    fn describe(&self) -> String {
        format!("shape({:?})", self.0)
    }

    fn check(&self, value: &T) -> Result<(), String> {
        let got = value.dims();
        if got == self.0 {
            Ok(())
        } else {
            Err(format!("expected shape {:?}, got {:?}", self.0, got))
        }
    }
}

pub struct Positive;

/// Scalar strictly greater than zero.
pub fn positive() -> Positive {
    Positive
}

impl<T> Constraint<T> for Positive
where
    T: PartialOrd + Default + Debug,
{
    fn describe(&self) -> String {
        "positive".to_string()
    }

    fn check(&self, value: &T) -> Result<(), String> {
        if *value > T::default() {
            Ok(())
        } else {
            Err(format!("expected a positive value, got {value:?}"))
        }
    }
}

pub struct AllPositive;

/// Every element strictly greater than zero.
pub fn all_positive() -> AllPositive {
    AllPositive
}

impl<T: Numbers + ?Sized> Constraint<T> for AllPositive {
    fn describe(&self) -> String {
        "all_positive".to_string()
    }

    fn check(&self, value: &T) -> Result<(), String> {
        match value.numbers().into_iter().find(|v| !(*v > 0.0)) {
            None => Ok(()),
            Some(bad) => Err(format!("expected all values positive, found {bad}")),
        }
    }
}

pub struct Finite;

/// No NaN or infinite elements.
pub fn finite() -> Finite {
    Finite
}

impl<T: Numbers + ?Sized> Constraint<T> for Finite {
    fn describe(&self) -> String {
        "finite".to_string()
    }

    fn check(&self, value: &T) -> Result<(), String> {
        match value.numbers().into_iter().find(|v| !v.is_finite()) {
            None => Ok(()),
            Some(bad) => Err(format!("expected finite values, found {bad}")),
        }
    }
}

pub struct OneOf<V>(Vec<V>);

/// Value must be a member of the given set.
pub fn one_of<V>(allowed: impl IntoIterator<Item = V>) -> OneOf<V> {
    OneOf(allowed.into_iter().collect())
}

impl<V> Constraint<V> for OneOf<V>
where
    V: PartialEq + Debug + Send + Sync,
{
    fn describe(&self) -> String {
        format!("one_of({:?})", self.0)
    }

    fn check(&self, value: &V) -> Result<(), String> {
        if self.0.contains(value) {
            Ok(())
        } else {
            Err(format!("{value:?} is not one of {:?}", self.0))
        }
    }
}

pub struct NonEmpty;

pub fn non_empty() -> NonEmpty {
    NonEmpty
}

impl<T: HasLen + ?Sized> Constraint<T> for NonEmpty {
    fn describe(&self) -> String {
        "non_empty".to_string()
    }

    fn check(&self, value: &T) -> Result<(), String> {
        if value.length() > 0 {
            Ok(())
        } else {
            Err("expected a non-empty value".to_string())
        }
    }
}

pub struct SameKeys;

/// Every map in the list must have the same key set.
pub fn same_keys() -> SameKeys {
    SameKeys
}

impl<K, V> Constraint<[BTreeMap<K, V>]> for SameKeys
where
    K: Ord + Debug,
{
    fn describe(&self) -> String {
        "same_keys".to_string()
    }

    fn check(&self, value: &[BTreeMap<K, V>]) -> Result<(), String> {
        let Some(first) = value.first() else {
            return Ok(());
        };
        match value.iter().position(|m| !m.keys().eq(first.keys())) {
            None => Ok(()),
            Some(idx) => Err(format!(
                "map {idx} has keys {:?}, expected {:?}",
                value[idx].keys().collect::<Vec<_>>(),
                first.keys().collect::<Vec<_>>()
            )),
        }
    }
}

impl<K, V> Constraint<Vec<BTreeMap<K, V>>> for SameKeys
where
    K: Ord + Debug,
{
    fn describe(&self) -> String {
        "same_keys".to_string()
    }

    fn check(&self, value: &Vec<BTreeMap<K, V>>) -> Result<(), String> {
        <Self as Constraint<[BTreeMap<K, V>]>>::check(self, value.as_slice())
    }
}

impl<'a, K, V> Constraint<&'a [BTreeMap<K, V>]> for SameKeys
where
    K: Ord + Debug,
{
    fn describe(&self) -> String {
        "same_keys".to_string()
    }

    fn check(&self, value: &&'a [BTreeMap<K, V>]) -> Result<(), String> {
        <Self as Constraint<[BTreeMap<K, V>]>>::check(self, value)
    }
}

pub struct Predicate<F> {
    description: &'static str,
    test: F,
}

/// Ad hoc check; `description` doubles as the failure message.
pub fn predicate<T: ?Sized, F>(description: &'static str, test: F) -> Predicate<F>
where
    F: Fn(&T) -> bool + Send + Sync,
{
    Predicate { description, test }
}

impl<T: ?Sized, F> Constraint<T> for Predicate<F>
where
    F: Fn(&T) -> bool + Send + Sync,
{
    fn describe(&self) -> String {
        self.description.to_string()
    }

    fn check(&self, value: &T) -> Result<(), String> {
        if (self.test)(value) {
            Ok(())
        } else {
            Err(format!("expected {}", self.description))
        }
    }
}
