//! Storage for the variables that properties mirror.
//!
//! The application owns a [`Variables`] arena for the whole lifetime of the
//! process and hands [`Var`] handles to the registry. A handle is just an index;
//! it does not keep the variable alive and must only be used with the arena that
//! created it.

use core::{
    fmt::Debug,
    marker::PhantomData,
    ops::{Index, IndexMut},
};

use tether_common::{TetherString, ValueKind};

use self::sealed::{Column, Slot};

mod sealed {
    use tether_common::TetherString;

    use super::Variables;

    #[derive(Debug, Clone)]
    pub struct Slot<T> {
        pub name: TetherString,
        pub value: T,
    }

    pub trait Column: Sized {
        fn column(vars: &Variables) -> &Vec<Slot<Self>>;
        fn column_mut(vars: &mut Variables) -> &mut Vec<Slot<Self>>;
    }
}

/// A value type that can back a property.
pub trait Scalar: Column + Clone + PartialEq + Default + Debug + 'static {
    const KIND: ValueKind;
}

macro_rules! scalar {
    ($ty:ty, $kind:ident, $field:ident) => {
        impl Column for $ty {
            fn column(vars: &Variables) -> &Vec<Slot<Self>> {
                &vars.$field
            }

            fn column_mut(vars: &mut Variables) -> &mut Vec<Slot<Self>> {
                &mut vars.$field
            }
        }

        impl Scalar for $ty {
            const KIND: ValueKind = ValueKind::$kind;
        }
    };
}

scalar!(bool, Bool, bools);
scalar!(i32, Int, ints);
scalar!(f32, Float, floats);
scalar!(String, String, strings);

/// Non-owning handle to a variable stored in [`Variables`].
pub struct Var<T> {
    index: usize,
    _ty: PhantomData<fn() -> T>,
}

impl<T> Clone for Var<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Var<T> {}

impl<T> PartialEq for Var<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Var<T> {}

impl<T> Debug for Var<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Var({})", self.index)
    }
}

/// Handle of any scalar kind, as returned by name lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnyVar {
    Bool(Var<bool>),
    Int(Var<i32>),
    Float(Var<f32>),
    String(Var<String>),
}

impl AnyVar {
    pub fn kind(&self) -> ValueKind {
        match self {
            AnyVar::Bool(_) => ValueKind::Bool,
            AnyVar::Int(_) => ValueKind::Int,
            AnyVar::Float(_) => ValueKind::Float,
            AnyVar::String(_) => ValueKind::String,
        }
    }
}

#[derive(Debug, Default)]
pub struct Variables {
    bools: Vec<Slot<bool>>,
    ints: Vec<Slot<i32>>,
    floats: Vec<Slot<f32>>,
    strings: Vec<Slot<String>>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<T: Scalar>(&mut self, name: impl Into<TetherString>, value: T) -> Var<T> {
        let column = T::column_mut(self);
        column.push(Slot { name: name.into(), value });

        Var { index: column.len() - 1, _ty: PhantomData }
    }

    pub fn get<T: Scalar>(&self, var: Var<T>) -> &T {
        &T::column(self)[var.index].value
    }

    pub fn get_mut<T: Scalar>(&mut self, var: Var<T>) -> &mut T {
        &mut T::column_mut(self)[var.index].value
    }

    pub fn set<T: Scalar>(&mut self, var: Var<T>, value: T) {
        *self.get_mut(var) = value;
    }

    pub fn name<T: Scalar>(&self, var: Var<T>) -> &str {
        &T::column(self)[var.index].name
    }

    pub fn lookup(&self, name: &str) -> Option<AnyVar> {
        fn find<T: Scalar>(vars: &Variables, name: &str) -> Option<Var<T>> {
            T::column(vars)
                .iter()
                .position(|slot| slot.name == name)
                .map(|index| Var { index, _ty: PhantomData })
        }

        find(self, name)
            .map(AnyVar::Bool)
            .or_else(|| find(self, name).map(AnyVar::Int))
            .or_else(|| find(self, name).map(AnyVar::Float))
            .or_else(|| find(self, name).map(AnyVar::String))
    }

    pub fn len(&self) -> usize {
        self.bools.len() + self.ints.len() + self.floats.len() + self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Scalar> Index<Var<T>> for Variables {
    type Output = T;

    fn index(&self, var: Var<T>) -> &T {
        self.get(var)
    }
}

impl<T: Scalar> IndexMut<Var<T>> for Variables {
    fn index_mut(&mut self, var: Var<T>) -> &mut T {
        self.get_mut(var)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_handles() {
        let mut vars = Variables::new();
        let lamp = vars.add("lamp", false);
        let level = vars.add("level", 3);
        let temp = vars.add("temp", 21.5f32);
        let label = vars.add("label", "kitchen".to_string());

        assert_eq!(vars[lamp], false);
        assert_eq!(vars[level], 3);
        assert_eq!(vars[temp], 21.5);
        assert_eq!(vars[label], "kitchen");
        assert_eq!(vars.len(), 4);

        vars[lamp] = true;
        vars.set(level, 7);
        vars.get_mut(label).push_str("_2");

        assert_eq!(vars[lamp], true);
        assert_eq!(vars[level], 7);
        assert_eq!(vars[label], "kitchen_2");
    }

    #[test]
    fn names_and_lookup() {
        let mut vars = Variables::new();
        let a = vars.add("a", true);
        let b = vars.add("b", 1.0f32);

        assert_eq!(vars.name(a), "a");
        assert_eq!(vars.name(b), "b");
        assert_eq!(vars.lookup("a"), Some(AnyVar::Bool(a)));
        assert_eq!(vars.lookup("b"), Some(AnyVar::Float(b)));
        assert_eq!(vars.lookup("b").map(|v| v.kind()), Some(ValueKind::Float));
        assert_eq!(vars.lookup("c"), None);
    }

    #[test]
    fn handles_of_different_kinds_do_not_alias() {
        let mut vars = Variables::new();
        let flag = vars.add("flag", true);
        let count = vars.add("count", 5);

        vars[count] = 9;

        assert_eq!(vars[flag], true);
        assert_eq!(vars[count], 9);
    }
}
