//! Style layers, loosely (very) based on MapLibre's style specification.

use crate::{
    Error,
    expression::{Context, Expression, Filter, Properties, is_feature_constant},
};
use serde_json::Value;
use std::{collections::BTreeMap, sync::Arc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayerType {
    Background,
    Fill,
    Line,
    Symbol,
    Circle,
    Heatmap,
    FillExtrusion,
    Raster,
    Hillshade,
}

impl LayerType {
    pub fn name(self) -> &'static str {
        match self {
            Self::Background => "background",
            Self::Fill => "fill",
            Self::Line => "line",
            Self::Symbol => "symbol",
            Self::Circle => "circle",
            Self::Heatmap => "heatmap",
            Self::FillExtrusion => "fill-extrusion",
            Self::Raster => "raster",
            Self::Hillshade => "hillshade",
        }
    }
}

/// Layer exactly as it comes with the style.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LayerSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: LayerType,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub source_layer: Option<String>,
    #[serde(default)]
    pub minzoom: Option<f64>,
    #[serde(default)]
    pub maxzoom: Option<f64>,
    #[serde(default)]
    pub filter: Option<Value>,
    #[serde(default)]
    pub layout: Option<Properties>,
    #[serde(default)]
    pub paint: Option<Properties>,
}

impl LayerSpec {
    pub fn new(id: impl Into<String>, kind: LayerType) -> Self {
        Self {
            id: id.into(),
            kind,
            source: None,
            source_layer: None,
            minzoom: None,
            maxzoom: None,
            filter: None,
            layout: None,
            paint: None,
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.layout
            .as_ref()
            .and_then(|layout| layout.get("visibility"))
            .is_some_and(|visibility| visibility == "none")
    }
}

/// Layer with its filter and properties compiled.
#[derive(Debug)]
pub struct StyleLayer {
    spec: LayerSpec,
    filter: Option<Filter>,
    layout: BTreeMap<String, Expression>,
    paint: BTreeMap<String, Expression>,
}

impl StyleLayer {
    /// # Errors
    ///
    /// When the filter or any of the properties is not a valid expression.
    pub fn new(spec: LayerSpec) -> Result<Self, Error> {
        let filter = spec.filter.as_ref().map(Filter::compile).transpose()?;
        let layout = compile_properties(spec.layout.as_ref())?;
        let paint = compile_properties(spec.paint.as_ref())?;
        Ok(Self {
            spec,
            filter,
            layout,
            paint,
        })
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn kind(&self) -> LayerType {
        self.spec.kind
    }

    pub fn spec(&self) -> &LayerSpec {
        &self.spec
    }

    pub fn source(&self) -> Option<&str> {
        self.spec.source.as_deref()
    }

    pub fn minzoom(&self) -> Option<f64> {
        self.spec.minzoom
    }

    pub fn maxzoom(&self) -> Option<f64> {
        self.spec.maxzoom
    }

    pub fn is_hidden(&self) -> bool {
        self.spec.is_hidden()
    }

    /// Whether the feature belongs to this layer. Layers without a filter take everything.
    pub fn matches(&self, context: &Context<'_>) -> bool {
        self.filter
            .as_ref()
            .is_none_or(|filter| filter.matches(context))
    }

    /// Evaluate everything that depends only on the zoom level. Layers are shared between
    /// tiles parsed at different zooms, so the result is a separate snapshot.
    pub fn recalculate(&self, parameters: &EvaluationParameters) -> EvaluatedLayer {
        EvaluatedLayer {
            id: self.spec.id.clone(),
            kind: self.spec.kind,
            zoom: parameters.zoom,
            available_images: Arc::clone(&parameters.available_images),
            layout: evaluate_properties(&self.layout, parameters),
            paint: evaluate_properties(&self.paint, parameters),
        }
    }
}

fn compile_properties(
    properties: Option<&Properties>,
) -> Result<BTreeMap<String, Expression>, Error> {
    properties
        .into_iter()
        .flatten()
        .map(|(name, value)| Ok((name.clone(), Expression::compile(value)?)))
        .collect()
}

fn evaluate_properties(
    properties: &BTreeMap<String, Expression>,
    parameters: &EvaluationParameters,
) -> BTreeMap<String, PropertyValue> {
    let empty = Properties::new();
    let context = Context::new(parameters.zoom, &empty)
        .with_available_images(&parameters.available_images);

    properties
        .iter()
        .filter_map(|(name, expression)| {
            if !is_feature_constant(expression.value()) {
                return Some((name.clone(), PropertyValue::DataDriven(expression.clone())));
            }
            match expression.evaluate(&context) {
                Ok(value) => Some((name.clone(), PropertyValue::Constant(value))),
                Err(error) => {
                    log::debug!("Could not evaluate '{name}': {error}");
                    None
                }
            }
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct EvaluationParameters {
    pub zoom: f64,
    pub available_images: Arc<[String]>,
}

impl EvaluationParameters {
    pub fn new(zoom: f64, available_images: Arc<[String]>) -> Self {
        Self {
            zoom,
            available_images,
        }
    }
}

#[derive(Debug, Clone)]
pub enum PropertyValue {
    Constant(Value),
    DataDriven(Expression),
}

/// Layer properties at a particular zoom level.
#[derive(Debug, Clone)]
pub struct EvaluatedLayer {
    pub id: String,
    pub kind: LayerType,
    pub zoom: f64,
    available_images: Arc<[String]>,
    layout: BTreeMap<String, PropertyValue>,
    paint: BTreeMap<String, PropertyValue>,
}

impl EvaluatedLayer {
    /// Context for evaluating data-driven properties of a single feature.
    pub fn context<'a>(&'a self, properties: &'a Properties) -> Context<'a> {
        Context::new(self.zoom, properties).with_available_images(&self.available_images)
    }

    pub fn layout(&self, name: &str, context: &Context<'_>) -> Option<Value> {
        resolve(&self.layout, name, context)
    }

    pub fn paint(&self, name: &str, context: &Context<'_>) -> Option<Value> {
        resolve(&self.paint, name, context)
    }

    pub fn has_layout(&self, name: &str) -> bool {
        self.layout.contains_key(name)
    }

    pub fn has_paint(&self, name: &str) -> bool {
        self.paint.contains_key(name)
    }

    /// Numeric property with a fallback.
    pub fn layout_f64(&self, name: &str, context: &Context<'_>, default: f64) -> f64 {
        self.layout(name, context)
            .and_then(|value| value.as_f64())
            .unwrap_or(default)
    }

    pub fn paint_f64(&self, name: &str, context: &Context<'_>, default: f64) -> f64 {
        self.paint(name, context)
            .and_then(|value| value.as_f64())
            .unwrap_or(default)
    }
}

fn resolve(
    properties: &BTreeMap<String, PropertyValue>,
    name: &str,
    context: &Context<'_>,
) -> Option<Value> {
    match properties.get(name)? {
        PropertyValue::Constant(Value::Null) => None,
        PropertyValue::Constant(value) => Some(value.clone()),
        PropertyValue::DataDriven(expression) => match expression.evaluate(context) {
            Ok(Value::Null) => None,
            Ok(value) => Some(value),
            Err(error) => {
                log::debug!("Could not evaluate '{name}': {error}");
                None
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn layer(value: Value) -> StyleLayer {
        StyleLayer::new(serde_json::from_value(value).unwrap()).unwrap()
    }

    #[test]
    fn parsing_layer_spec() {
        let spec: LayerSpec = serde_json::from_value(json!({
            "id": "roads",
            "type": "line",
            "source": "openmaptiles",
            "source-layer": "transportation",
            "minzoom": 5,
            "layout": {"visibility": "none"},
            "paint": {"line-width": 2}
        }))
        .unwrap();

        assert_eq!(spec.kind, LayerType::Line);
        assert_eq!(spec.source_layer.as_deref(), Some("transportation"));
        assert_eq!(spec.minzoom, Some(5.));
        assert!(spec.is_hidden());
    }

    #[test]
    fn invalid_filter_is_rejected() {
        let mut spec = LayerSpec::new("broken", LayerType::Fill);
        spec.filter = Some(json!(["no-such-operator", 1]));
        assert!(matches!(StyleLayer::new(spec), Err(Error::Parse(_))));
    }

    #[test]
    fn recalculation_is_a_snapshot_per_zoom() {
        let layer = layer(json!({
            "id": "roads",
            "type": "line",
            "paint": {
                "line-width": ["interpolate", ["linear"], ["zoom"], 0, 1, 10, 11],
                "line-color": ["get", "color"]
            }
        }));

        let low = layer.recalculate(&EvaluationParameters::new(0., Arc::from([])));
        let high = layer.recalculate(&EvaluationParameters::new(10., Arc::from([])));

        let properties = json!({"color": "red"}).as_object().cloned().unwrap();
        assert_eq!(low.paint_f64("line-width", &low.context(&properties), 0.), 1.);
        assert_eq!(high.paint_f64("line-width", &high.context(&properties), 0.), 11.);
        assert_eq!(
            high.paint("line-color", &high.context(&properties)),
            Some(json!("red"))
        );
        assert_eq!(high.paint("line-opacity", &high.context(&properties)), None);
    }

    #[test]
    fn layers_without_filter_take_everything() {
        let layer = layer(json!({"id": "all", "type": "circle"}));
        let properties = Properties::new();
        assert!(layer.matches(&Context::new(0., &properties)));
    }
}
