//! Grouping of style layers into families sharing a bucket.

use super::{LayerSpec, StyleLayer};
use crate::{Error, vector_tile::GEOJSON_TILE_LAYER};
use serde_json::Value;
use std::{
    collections::{BTreeMap, HashMap},
    fmt::Write as _,
    sync::Arc,
};

/// Layers sharing everything that affects the layout. The first one is representative.
pub type Family = Arc<[Arc<StyleLayer>]>;

/// Families keyed by source layer.
pub type SourceFamilies = BTreeMap<String, Vec<Family>>;

#[derive(Debug, Default)]
pub struct StyleLayerIndex {
    key_cache: HashMap<String, String>,
    order: Vec<String>,
    layers: HashMap<String, Arc<StyleLayer>>,
    families_by_source: HashMap<String, SourceFamilies>,
}

impl StyleLayerIndex {
    /// # Errors
    ///
    /// When any of the layers does not compile.
    pub fn new(layers: Vec<LayerSpec>) -> Result<Self, Error> {
        let mut index = Self::default();
        index.replace(layers)?;
        Ok(index)
    }

    pub fn replace(&mut self, layers: Vec<LayerSpec>) -> Result<(), Error> {
        let compiled = compile(layers)?;
        self.order.clear();
        self.layers.clear();
        self.apply(compiled, &[]);
        Ok(())
    }

    /// Set or replace given layers, drop the removed ones and group everything again, as
    /// a change to one layer can move its siblings between families.
    pub fn update(&mut self, layers: Vec<LayerSpec>, removed_ids: &[String]) -> Result<(), Error> {
        let compiled = compile(layers)?;
        self.apply(compiled, removed_ids);
        Ok(())
    }

    fn apply(&mut self, layers: Vec<StyleLayer>, removed_ids: &[String]) {
        for layer in layers {
            let id = layer.id().to_owned();
            self.key_cache.remove(&id);
            if self.layers.insert(id.clone(), Arc::new(layer)).is_none() {
                self.order.push(id);
            }
        }

        for id in removed_ids {
            self.key_cache.remove(id);
            self.layers.remove(id);
        }
        self.order.retain(|id| self.layers.contains_key(id));

        self.regroup();
    }

    fn regroup(&mut self) {
        let mut groups: Vec<Vec<Arc<StyleLayer>>> = Vec::new();
        let mut positions = HashMap::new();

        for id in &self.order {
            let Some(layer) = self.layers.get(id) else {
                continue;
            };
            let key = self
                .key_cache
                .entry(id.clone())
                .or_insert_with(|| layout_key(layer.spec()));
            let position = *positions.entry(key.clone()).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[position].push(Arc::clone(layer));
        }

        self.families_by_source.clear();
        for group in groups {
            let Some(first) = group.first() else {
                continue;
            };
            if first.is_hidden() {
                continue;
            }

            let source = first.source().unwrap_or_default().to_owned();
            let source_layer = first
                .spec()
                .source_layer
                .clone()
                .unwrap_or_else(|| GEOJSON_TILE_LAYER.to_owned());

            self.families_by_source
                .entry(source)
                .or_default()
                .entry(source_layer)
                .or_default()
                .push(Family::from(group));
        }
    }

    /// Families of the source, keyed by source layer.
    pub fn families(&self, source: &str) -> Option<&SourceFamilies> {
        self.families_by_source.get(source)
    }

    pub fn layer(&self, id: &str) -> Option<&Arc<StyleLayer>> {
        self.layers.get(id)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

fn compile(layers: Vec<LayerSpec>) -> Result<Vec<StyleLayer>, Error> {
    layers.into_iter().map(StyleLayer::new).collect()
}

/// Concatenation of everything affecting the layout of a layer. Equal keys mean the
/// layers can share a bucket.
fn layout_key(spec: &LayerSpec) -> String {
    let mut key = String::new();
    let kind = Value::from(spec.kind.name());
    let source = spec.source.clone().map(Value::from);
    let source_layer = spec.source_layer.clone().map(Value::from);
    let minzoom = spec.minzoom.map(Value::from);
    let maxzoom = spec.maxzoom.map(Value::from);
    let layout = spec.layout.clone().map(Value::Object);

    for value in [
        Some(&kind),
        source.as_ref(),
        source_layer.as_ref(),
        minzoom.as_ref(),
        maxzoom.as_ref(),
        spec.filter.as_ref(),
        layout.as_ref(),
    ] {
        key.push('/');
        match value {
            Some(value) => stringify(value, &mut key),
            None => key.push_str("undefined"),
        }
    }
    key
}

/// Deterministic serialization, object keys are sorted and numbers normalized so
/// that `1` and `1.0` are the same.
fn stringify(value: &Value, out: &mut String) {
    match value {
        Value::Number(number) => match number.as_f64() {
            Some(number) => {
                let _ = write!(out, "{number}");
            }
            None => out.push_str(&number.to_string()),
        },
        Value::Array(values) => {
            out.push('[');
            for value in values {
                stringify(value, out);
                out.push(',');
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();
            out.push('{');
            for key in keys {
                out.push_str(&Value::from(key.as_str()).to_string());
                out.push(':');
                if let Some(value) = map.get(key) {
                    stringify(value, out);
                }
                out.push(',');
            }
            out.push('}');
        }
        other => out.push_str(&other.to_string()),
    }
}
