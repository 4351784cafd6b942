//! Document values and their conversion to and from the stored representation.
//!
//! Backends store every value as [`Bson`]. Any serde type can be used as a document body;
//! [`DocumentExt`] is implemented for all of them and performs the conversion.

use bson::{Bson, de::deserialize_from_bson, ser::serialize_to_bson};
use serde::{Serialize, de::DeserializeOwned};

use crate::{cas::Cas, error::KvStoreResult};

/// Extension trait providing serialization/deserialization utilities for document bodies.
///
/// This trait is automatically implemented for all types that are both `Serialize` and
/// `DeserializeOwned`.
pub trait DocumentExt: Sized {
    /// Converts this value to BSON for storage.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    fn to_bson(&self) -> KvStoreResult<Bson>;

    /// Creates a value from its stored BSON form.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails or the structure is invalid.
    fn from_bson(bson: Bson) -> KvStoreResult<Self>;
}

impl<T> DocumentExt for T
where
    T: Serialize + DeserializeOwned,
{
    fn to_bson(&self) -> KvStoreResult<Bson> {
        Ok(serialize_to_bson(self)?)
    }

    fn from_bson(bson: Bson) -> KvStoreResult<Self> {
        Ok(deserialize_from_bson(bson)?)
    }
}

/// A value together with the CAS the store reported for it.
///
/// The CAS must be threaded into the very next conditional write of the same key.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub cas: Cas,
}

impl<T> Versioned<T> {
    pub fn new(value: T, cas: Cas) -> Self {
        Self { value, cas }
    }

    /// Maps the value, keeping the CAS.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Versioned<U> {
        Versioned {
            value: f(self.value),
            cas: self.cas,
        }
    }

    /// Converts a stored value into a typed one.
    pub fn try_map<U>(self, f: impl FnOnce(T) -> KvStoreResult<U>) -> KvStoreResult<Versioned<U>> {
        Ok(Versioned {
            value: f(self.value)?,
            cas: self.cas,
        })
    }
}

impl Versioned<Bson> {
    /// Deserializes the stored value into `T`.
    pub fn content_as<T: DeserializeOwned>(self) -> KvStoreResult<Versioned<T>> {
        self.try_map(|bson| Ok(deserialize_from_bson(bson)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Data {
        #[serde(rename = "Number")]
        number: i64,
        text: String,
    }

    #[test]
    fn stored_form_keeps_field_names() {
        let data = Data { number: 42, text: "Life, the Universe, and Everything".to_string() };
        let bson = data.to_bson().unwrap();
        let doc = bson.as_document().unwrap();

        assert_eq!(doc.get_i64("Number").unwrap(), 42);
        assert_eq!(Data::from_bson(bson).unwrap(), data);
    }

    #[test]
    fn content_as_keeps_cas() {
        let stored = Versioned::new(
            Data { number: 1, text: String::new() }.to_bson().unwrap(),
            Cas::new(9),
        );

        let typed = stored.content_as::<Data>().unwrap();
        assert_eq!(typed.cas, Cas::new(9));
        assert_eq!(typed.value.number, 1);
    }

    #[test]
    fn content_as_rejects_wrong_shape() {
        let stored = Versioned::new(Bson::String("hello".to_string()), Cas::new(1));
        assert!(stored.content_as::<Data>().is_err());
    }
}
