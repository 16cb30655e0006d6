mod index;
mod layer;

pub use index::{Family, SourceFamilies, StyleLayerIndex};
pub use layer::{
    EvaluatedLayer, EvaluationParameters, LayerSpec, LayerType, PropertyValue, StyleLayer,
};
