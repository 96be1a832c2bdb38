//! Partial application over [`Invoke`] callees.
//!
//! Bound arguments accumulate in immutable records; the callee (and any
//! validation it performs) runs only once every argument is present, so an
//! intermediate partial is never validated.

use std::sync::Arc;

use crate::validate::Invoke;

/// Two-argument callee that can be called directly or one argument at a time.
pub struct Curried2<C> {
    callee: Arc<C>,
}

/// [`Curried2`] with its first argument bound.
pub struct Bound1Of2<C, A> {
    callee: Arc<C>,
    a: A,
}

/// Three-argument callee that can be called directly or in stages.
pub struct Curried3<C> {
    callee: Arc<C>,
}

/// [`Curried3`] with its first argument bound.
pub struct Bound1Of3<C, A> {
    callee: Arc<C>,
    a: A,
}

/// [`Curried3`] with its first two arguments bound.
pub struct Bound2Of3<C, A, B> {
    callee: Arc<C>,
    a: A,
    b: B,
}

pub fn curry2<C>(callee: C) -> Curried2<C> {
    Curried2 {
        callee: Arc::new(callee),
    }
}

pub fn curry3<C>(callee: C) -> Curried3<C> {
    Curried3 {
        callee: Arc::new(callee),
    }
}

impl<C> Curried2<C> {
    pub fn call<A, B>(&self, a: A, b: B) -> <C as Invoke<(A, B)>>::Output
    where
        C: Invoke<(A, B)>,
    {
        self.callee.invoke((a, b))
    }

    pub fn apply<A>(&self, a: A) -> Bound1Of2<C, A> {
        Bound1Of2 {
            callee: Arc::clone(&self.callee),
            a,
        }
    }
}

impl<C, A: Clone> Bound1Of2<C, A> {
    pub fn call<B>(&self, b: B) -> <C as Invoke<(A, B)>>::Output
    where
        C: Invoke<(A, B)>,
    {
        self.callee.invoke((self.a.clone(), b))
    }

    pub fn bound(&self) -> &A {
        &self.a
    }
}

impl<C> Curried3<C> {
    pub fn call<A, B, D>(&self, a: A, b: B, d: D) -> <C as Invoke<(A, B, D)>>::Output
    where
        C: Invoke<(A, B, D)>,
    {
        self.callee.invoke((a, b, d))
    }

    pub fn apply<A>(&self, a: A) -> Bound1Of3<C, A> {
        Bound1Of3 {
            callee: Arc::clone(&self.callee),
            a,
        }
    }

    pub fn apply2<A, B>(&self, a: A, b: B) -> Bound2Of3<C, A, B> {
        Bound2Of3 {
            callee: Arc::clone(&self.callee),
            a,
            b,
        }
    }
}

impl<C, A: Clone> Bound1Of3<C, A> {
    pub fn call<B, D>(&self, b: B, d: D) -> <C as Invoke<(A, B, D)>>::Output
    where
        C: Invoke<(A, B, D)>,
    {
        self.callee.invoke((self.a.clone(), b, d))
    }

    pub fn apply<B>(&self, b: B) -> Bound2Of3<C, A, B> {
        Bound2Of3 {
            callee: Arc::clone(&self.callee),
            a: self.a.clone(),
            b,
        }
    }
}

impl<C, A: Clone, B: Clone> Bound2Of3<C, A, B> {
    pub fn call<D>(&self, d: D) -> <C as Invoke<(A, B, D)>>::Output
    where
        C: Invoke<(A, B, D)>,
    {
        self.callee.invoke((self.a.clone(), self.b.clone(), d))
    }
}
