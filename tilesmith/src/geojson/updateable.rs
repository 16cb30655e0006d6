//! Id-addressable view of a GeoJSON document, the target of source diffs.

use super::{Feature, FeatureCollection, FeatureId, GeoJson, Geometry};
use crate::expression::Properties;
use serde::Deserialize;
use indexmap::IndexMap;
use serde_json::Value;

/// Features by id, iterated in the order they were added.
pub type UpdateableGeoJson = IndexMap<FeatureId, Feature>;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeoJsonSourceDiff {
    pub remove_all: bool,
    pub remove: Vec<FeatureId>,
    pub add: Vec<Feature>,
    pub update: Vec<GeoJsonFeatureDiff>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoJsonFeatureDiff {
    pub id: FeatureId,
    #[serde(default)]
    pub new_geometry: Option<Geometry>,
    #[serde(default)]
    pub remove_all_properties: bool,
    #[serde(default)]
    pub remove_properties: Vec<String>,
    #[serde(default)]
    pub add_or_update_properties: Vec<PropertyUpdate>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PropertyUpdate {
    pub key: String,
    pub value: Value,
}

/// Index the document by feature id. Only possible when every feature has an id,
/// and no id repeats.
pub fn to_updateable(geojson: &GeoJson, promote_id: Option<&str>) -> Option<UpdateableGeoJson> {
    match geojson {
        GeoJson::Feature(feature) => {
            let id = feature.feature_id(promote_id)?;
            Some(IndexMap::from([(id, feature.clone())]))
        }
        GeoJson::FeatureCollection(collection) => {
            let mut updateable = IndexMap::with_capacity(collection.features.len());
            for feature in &collection.features {
                let id = feature.feature_id(promote_id)?;
                if updateable.insert(id, feature.clone()).is_some() {
                    return None;
                }
            }
            Some(updateable)
        }
        GeoJson::Geometry(_) => None,
    }
}

/// Apply removals, additions and updates, in this order. Updates of unknown
/// features are ignored.
pub fn apply_source_diff(
    updateable: &mut UpdateableGeoJson,
    diff: &GeoJsonSourceDiff,
    promote_id: Option<&str>,
) {
    if diff.remove_all {
        updateable.clear();
    }

    for id in &diff.remove {
        updateable.shift_remove(id);
    }

    for feature in &diff.add {
        if let Some(id) = feature.feature_id(promote_id) {
            updateable.insert(id, feature.clone());
        }
    }

    for update in &diff.update {
        let Some(feature) = updateable.get_mut(&update.id) else {
            log::debug!("Ignoring update of unknown feature {:?}.", update.id);
            continue;
        };

        if let Some(geometry) = &update.new_geometry {
            feature.geometry = Some(geometry.clone());
        }

        if !update.remove_all_properties
            && update.remove_properties.is_empty()
            && update.add_or_update_properties.is_empty()
        {
            continue;
        }

        let properties = feature.properties.get_or_insert_with(Properties::new);
        if update.remove_all_properties {
            properties.clear();
        } else {
            for key in &update.remove_properties {
                properties.remove(key);
            }
        }

        for PropertyUpdate { key, value } in &update.add_or_update_properties {
            properties.insert(key.clone(), value.clone());
        }
    }
}

impl From<&UpdateableGeoJson> for GeoJson {
    fn from(updateable: &UpdateableGeoJson) -> Self {
        GeoJson::FeatureCollection(FeatureCollection {
            features: updateable.values().cloned().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geojson::Position;
    use serde_json::json;

    fn point(id: i64, x: f64) -> Feature {
        Feature::new(Geometry::Point {
            coordinates: Position(x, 0.),
        })
        .with_id(id)
    }

    fn collection(features: Vec<Feature>) -> GeoJson {
        GeoJson::FeatureCollection(FeatureCollection { features })
    }

    #[test]
    fn documents_without_unique_ids_are_not_updateable() {
        assert!(to_updateable(&collection(vec![point(1, 0.), point(2, 1.)]), None).is_some());
        assert!(to_updateable(&collection(vec![point(1, 0.), point(1, 1.)]), None).is_none());

        let anonymous = Feature::new(Geometry::Point {
            coordinates: Position(0., 0.),
        });
        assert!(to_updateable(&collection(vec![point(1, 0.), anonymous]), None).is_none());
    }

    #[test]
    fn promoted_ids() {
        let feature = point(1, 0.).with_properties(
            json!({"code": "PL"}).as_object().cloned().unwrap(),
        );
        let updateable = to_updateable(&GeoJson::Feature(feature), Some("code")).unwrap();
        assert!(updateable.contains_key(&FeatureId::String("PL".to_owned())));
    }

    #[test]
    fn add_then_remove_restores_the_original() {
        let original = to_updateable(&collection(vec![point(1, 0.), point(2, 1.)]), None).unwrap();
        let mut updateable = original.clone();

        let added = point(3, 2.);
        apply_source_diff(
            &mut updateable,
            &GeoJsonSourceDiff {
                add: vec![added],
                ..Default::default()
            },
            None,
        );
        assert_eq!(updateable.len(), 3);

        apply_source_diff(
            &mut updateable,
            &GeoJsonSourceDiff {
                remove: vec![FeatureId::Int(3)],
                ..Default::default()
            },
            None,
        );
        assert_eq!(updateable, original);
    }

    #[test]
    fn updating_geometry_and_properties() {
        let mut updateable = to_updateable(
            &collection(vec![point(1, 0.).with_properties(
                json!({"a": 1, "b": 2, "c": 3}).as_object().cloned().unwrap(),
            )]),
            None,
        )
        .unwrap();

        let diff: GeoJsonSourceDiff = serde_json::from_value(json!({
            "update": [
                {
                    "id": 1,
                    "newGeometry": {"type": "Point", "coordinates": [5, 5]},
                    "removeProperties": ["a"],
                    "addOrUpdateProperties": [{"key": "b", "value": 20}, {"key": "d", "value": "x"}]
                },
                {"id": 42, "removeAllProperties": true}
            ]
        }))
        .unwrap();
        apply_source_diff(&mut updateable, &diff, None);

        let feature = &updateable[&FeatureId::Int(1)];
        assert_eq!(
            feature.geometry,
            Some(Geometry::Point {
                coordinates: Position(5., 5.)
            })
        );
        assert_eq!(
            feature.properties,
            json!({"b": 20, "c": 3, "d": "x"}).as_object().cloned()
        );
    }

    #[test]
    fn features_keep_their_order() {
        let mut updateable =
            to_updateable(&collection(vec![point(5, 0.), point(3, 1.), point(8, 2.)]), None)
                .unwrap();
        apply_source_diff(
            &mut updateable,
            &GeoJsonSourceDiff {
                remove: vec![FeatureId::Int(8)],
                add: vec![point(0, 3.)],
                ..Default::default()
            },
            None,
        );

        assert_eq!(
            updateable.keys().collect::<Vec<_>>(),
            vec![&FeatureId::Int(5), &FeatureId::Int(3), &FeatureId::Int(0)]
        );
        let GeoJson::FeatureCollection(collection) = GeoJson::from(&updateable) else {
            panic!("expected a collection");
        };
        let ids: Vec<_> = collection
            .features
            .iter()
            .map(|feature| feature.feature_id(None))
            .collect();
        assert_eq!(
            ids,
            vec![
                Some(FeatureId::Int(5)),
                Some(FeatureId::Int(3)),
                Some(FeatureId::Int(0))
            ]
        );
    }

    #[test]
    fn remove_all_comes_before_add() {
        let mut updateable = to_updateable(&collection(vec![point(1, 0.)]), None).unwrap();
        apply_source_diff(
            &mut updateable,
            &GeoJsonSourceDiff {
                remove_all: true,
                add: vec![point(2, 0.)],
                ..Default::default()
            },
            None,
        );
        assert_eq!(updateable.keys().collect::<Vec<_>>(), vec![&FeatureId::Int(2)]);
    }
}
