use core::marker::PhantomData;

use tether_common::{OnOffPayload, TetherString, TopicName};

use crate::{
    property::{Property, PropertyKind},
    variables::{Scalar, Var},
};

/// Properties in configuration order.
///
/// Several properties may share a state topic; every one of them is updated
/// when a message arrives on it.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    properties: Vec<Property>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a property mirroring `var`.
    ///
    /// The caller keeps ownership of the variable; it has to stay in the same
    /// [`Variables`](crate::Variables) for as long as the registry is in use.
    pub fn add<T: Scalar>(&mut self, var: Var<T>) -> PropertyBuilder<'_, T>
    where
        PropertyKind: From<Var<T>>,
    {
        self.properties.push(Property::new(PropertyKind::from(var)));
        let index = self.properties.len() - 1;

        PropertyBuilder {
            property: &mut self.properties[index],
            _ty: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Property> {
        self.properties.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Property> {
        self.properties.iter_mut()
    }

    /// Properties listening on `topic`, in registration order.
    pub fn subscribed_to<'a>(
        &'a mut self,
        topic: &'a str,
    ) -> impl Iterator<Item = &'a mut Property> {
        self.properties
            .iter_mut()
            .filter(move |p| p.state_topic.as_ref().is_some_and(|t| t.matches(topic)))
    }
}

impl<'a> IntoIterator for &'a Registry {
    type Item = &'a Property;
    type IntoIter = core::slice::Iter<'a, Property>;

    fn into_iter(self) -> Self::IntoIter {
        self.properties.iter()
    }
}

/// Configures a freshly registered property.
pub struct PropertyBuilder<'a, T> {
    property: &'a mut Property,
    _ty: PhantomData<T>,
}

impl<T> PropertyBuilder<'_, T> {
    /// Topic on which the device reports its state.
    pub fn state_topic(self, topic: impl Into<TopicName>) -> Self {
        self.property.state_topic = Some(topic.into());
        self
    }

    /// Topic on which commands are published.
    pub fn command_topic(self, topic: impl Into<TopicName>) -> Self {
        self.property.command_topic = Some(topic.into());
        self
    }

    /// Treat state payloads as JSON objects and read this field from them.
    pub fn json_field(self, field: impl Into<TetherString>) -> Self {
        self.property.json_field = Some(field.into());
        self
    }

    pub fn property(&self) -> &Property {
        self.property
    }
}

impl PropertyBuilder<'_, bool> {
    /// Literals the device uses to report its state. Defaults to `on`/`off`.
    pub fn state_payload(self, on: impl Into<TetherString>, off: impl Into<TetherString>) -> Self {
        if let PropertyKind::Bool(p) = &mut self.property.kind {
            p.state_payload = OnOffPayload::new(on, off);
        }
        self
    }

    /// Literals the device accepts as commands. Defaults to `on`/`off`.
    pub fn command_payload(
        self,
        on: impl Into<TetherString>,
        off: impl Into<TetherString>,
    ) -> Self {
        if let PropertyKind::Bool(p) = &mut self.property.kind {
            p.command_payload = OnOffPayload::new(on, off);
        }
        self
    }
}
