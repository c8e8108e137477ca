use serde::{Deserialize, Serialize};

use crate::ids::EntityId;

/// A scalar field value on an entity. `Null` is the "unset" state the
/// merge reconcilers test for; `EntityRef` carries foreign-key-shaped
/// fields that the scalar pass must leave alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(i64),
    EntityRef(EntityId),
    Bytes(Vec<u8>),
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b).is_eq(),
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            (Self::EntityRef(a), Self::EntityRef(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for FieldValue {}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_entity_ref(&self) -> Option<EntityId> {
        match self {
            FieldValue::EntityRef(id) => Some(*id),
            _ => None,
        }
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_the_only_unset_value() {
        assert!(FieldValue::Null.is_null());
        assert!(!FieldValue::Text(String::new()).is_null());
        assert!(!FieldValue::Integer(0).is_null());
    }

    #[test]
    fn msgpack_round_trip() {
        let values = [
            FieldValue::Null,
            FieldValue::Text("Alice".into()),
            FieldValue::Integer(-7),
            FieldValue::Float(2.5),
            FieldValue::Boolean(true),
            FieldValue::Timestamp(1_700_000_000),
            FieldValue::EntityRef(EntityId::new()),
            FieldValue::Bytes(vec![0xde, 0xad]),
        ];
        for v in values {
            let bytes = v.to_msgpack().unwrap();
            assert_eq!(FieldValue::from_msgpack(&bytes).unwrap(), v);
        }
    }

    #[test]
    fn float_equality_uses_total_order() {
        assert_eq!(FieldValue::Float(f64::NAN), FieldValue::Float(f64::NAN));
        assert_ne!(FieldValue::Float(0.0), FieldValue::Float(-0.0));
    }
}
