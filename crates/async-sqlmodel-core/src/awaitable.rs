//! Awaitable field declarations.
//!
//! A struct field typed [`Awaitable<T>`] and tagged `#[awaitable(field = "...")]`
//! is a declaration marker, not data: the `#[async_model]` attribute removes
//! it before the schema derive runs, records it in the model's awaitable
//! registry, and generates an accessor method in its place. The target field
//! name is not checked at definition time; a bad target surfaces as an
//! attribute-lookup failure the first time the accessor's future is awaited.

use crate::bridge::BridgeFuture;
use crate::model::Model;
use crate::relationship::FromRelated;
use crate::row::FromValue;
use crate::value::Value;
use asupersync::Cx;
use std::marker::PhantomData;

/// Marker type for an awaitable accessor declaration.
///
/// Values of this type never exist at runtime; the declaring field is
/// stripped from the struct before it is compiled.
pub struct Awaitable<T> {
    _marker: PhantomData<fn() -> T>,
}

/// One entry in a model's awaitable registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AwaitableFieldInfo {
    /// Name of the generated accessor method.
    pub name: &'static str,
    /// Name of the attribute or relationship the accessor reads.
    pub field: &'static str,
}

impl AwaitableFieldInfo {
    pub const fn new(name: &'static str, field: &'static str) -> Self {
        Self { name, field }
    }
}

/// A model with awaitable accessors. Implemented by `#[async_model]`.
pub trait AsyncModel: Model {
    /// The model's awaitable registry, fixed at definition time. One entry
    /// per declaration marker, in declaration order.
    const AWAITABLE_FIELDS: &'static [AwaitableFieldInfo];

    fn awaitable_fields() -> &'static [AwaitableFieldInfo] {
        Self::AWAITABLE_FIELDS
    }
}

/// Session-side capability behind generated accessors.
///
/// An accessor identifies its object by primary key and names the target
/// attribute or relationship; the implementation marshals the blocking read
/// through its execution bridge.
pub trait AwaitableRead<M: Model> {
    /// Read a column attribute, refreshing the object from the database
    /// first if the attribute is expired.
    fn read_attribute<T>(&self, cx: &Cx, pk: Vec<Value>, attribute: &'static str) -> BridgeFuture<T>
    where
        T: FromValue + Send + 'static;

    /// Load the objects behind a declared relationship.
    fn read_related<R>(&self, cx: &Cx, pk: Vec<Value>, relationship: &'static str) -> BridgeFuture<R>
    where
        R: FromRelated + Send + 'static;
}
