//! Typed property accessors.

use std::fmt;
use std::sync::Arc;

use crate::Result;
use crate::value::{FromValue, Value};

type Getter<C> = Arc<dyn Fn(&C) -> Value + Send + Sync>;
type Setter<C> = Arc<dyn Fn(&mut C, &Value) -> Result<()> + Send + Sync>;

/// Getter/setter pair for one mapped property of `C`.
///
/// Built from typed closures; the conversion to and from [`Value`] goes
/// through `Into<Value>` and [`FromValue`], so a mismatched property type is
/// a compile error rather than a runtime lookup failure.
pub struct PropertyAccessor<C> {
    get: Getter<C>,
    set: Setter<C>,
}

impl<C: 'static> PropertyAccessor<C> {
    pub fn new<P, G, S>(get: G, set: S) -> Self
    where
        P: Into<Value> + FromValue,
        G: Fn(&C) -> P + Send + Sync + 'static,
        S: Fn(&mut C, P) + Send + Sync + 'static,
    {
        Self {
            get: Arc::new(move |entity: &C| get(entity).into()),
            set: Arc::new(move |entity: &mut C, value: &Value| {
                set(entity, P::from_value(value)?);
                Ok(())
            }),
        }
    }
}

impl<C> PropertyAccessor<C> {
    pub fn get(&self, entity: &C) -> Value {
        (self.get)(entity)
    }

    pub fn set(&self, entity: &mut C, value: &Value) -> Result<()> {
        (self.set)(entity, value)
    }
}

impl<C> Clone for PropertyAccessor<C> {
    fn clone(&self) -> Self {
        Self {
            get: Arc::clone(&self.get),
            set: Arc::clone(&self.set),
        }
    }
}

impl<C> fmt::Debug for PropertyAccessor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyAccessor").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Person {
        age: i32,
        nickname: Option<String>,
    }

    #[test]
    fn typed_round_trip() {
        let age = PropertyAccessor::new(|p: &Person| p.age, |p, v| p.age = v);
        let nickname = PropertyAccessor::new(
            |p: &Person| p.nickname.clone(),
            |p, v| p.nickname = v,
        );

        let mut person = Person::default();
        age.set(&mut person, &Value::BigInt(33)).unwrap();
        nickname.set(&mut person, &Value::Null).unwrap();
        assert_eq!(person.age, 33);
        assert_eq!(age.get(&person), Value::Int(33));
        assert_eq!(nickname.get(&person), Value::Null);

        assert!(age.set(&mut person, &Value::from("old")).is_err());
        assert_eq!(person.age, 33);
    }
}
