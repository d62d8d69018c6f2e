//! ManagedResource wrapper over dynamic objects

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::core::DynamicObject;
use kube::ResourceExt;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::ResourceKind;
use crate::error::Result;

/// One instance of a managed Longhorn resource
#[derive(Clone, Debug)]
pub struct ManagedResource {
    kind: ResourceKind,
    object: DynamicObject,
}

impl ManagedResource {
    /// Wrap an object read from the store
    pub fn new(kind: ResourceKind, object: DynamicObject) -> Self {
        Self { kind, object }
    }

    /// Build an empty namespaced instance of `kind`
    pub fn build(kind: ResourceKind, name: &str, namespace: &str) -> Self {
        let object = DynamicObject::new(name, &kind.api_resource()).within(namespace);
        Self { kind, object }
    }

    pub fn with_spec(mut self, spec: Value) -> Self {
        self.object.data["spec"] = spec;
        self
    }

    pub fn with_status(mut self, status: Value) -> Self {
        self.object.data["status"] = status;
        self
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.object
            .labels_mut()
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_annotation(mut self, key: &str, value: &str) -> Self {
        self.annotate(key, value);
        self
    }

    pub fn with_finalizer(mut self, finalizer: &str) -> Self {
        self.object.finalizers_mut().push(finalizer.to_string());
        self
    }

    pub fn with_deletion_timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.object.metadata.deletion_timestamp = Some(Time(at));
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn name(&self) -> String {
        self.object.name_any()
    }

    pub fn namespace(&self) -> Option<String> {
        self.object.namespace()
    }

    /// When the object was soft-deleted, if it was
    pub fn deletion_timestamp(&self) -> Option<DateTime<Utc>> {
        self.object
            .metadata
            .deletion_timestamp
            .as_ref()
            .map(|t| t.0)
    }

    pub fn finalizers(&self) -> &[String] {
        self.object.finalizers()
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.object.labels().get(key).map(String::as_str)
    }

    pub fn has_annotation(&self, key: &str) -> bool {
        self.object.annotations().contains_key(key)
    }

    /// Set an annotation, creating the annotation map if needed
    pub fn annotate(&mut self, key: &str, value: &str) {
        self.object
            .annotations_mut()
            .insert(key.to_string(), value.to_string());
    }

    /// Overwrite a single top-level spec field
    pub fn set_spec_field(&mut self, field: &str, value: Value) {
        self.object.data["spec"][field] = value;
    }

    /// Deserialize the spec into a typed view; a missing spec yields the default view
    pub fn spec<T: DeserializeOwned + Default>(&self) -> Result<T> {
        section(&self.object.data, "spec")
    }

    /// Deserialize the status into a typed view; a missing status yields the default view
    pub fn status<T: DeserializeOwned + Default>(&self) -> Result<T> {
        section(&self.object.data, "status")
    }

    pub fn object(&self) -> &DynamicObject {
        &self.object
    }

    pub fn object_mut(&mut self) -> &mut DynamicObject {
        &mut self.object
    }

    pub fn into_object(self) -> DynamicObject {
        self.object
    }
}

fn section<T: DeserializeOwned + Default>(data: &Value, key: &str) -> Result<T> {
    match data.get(key) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => Ok(serde_json::from_value(value.clone())?),
    }
}
