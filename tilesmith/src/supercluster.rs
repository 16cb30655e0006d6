//! Hierarchical greedy clustering of points.
//!
//! Points are clustered at the highest zoom first, then the clusters of every level are
//! clustered again one zoom lower. Each level is kept in its own R-tree, and every node
//! remembers the cluster it was absorbed into, which makes it possible to walk the
//! hierarchy back down.

use crate::{
    Error,
    expression::{self, Context, Expression, Properties},
    geojson::{Feature, Geometry, Position},
    geojson_vt::TileFeature,
    mercator::{lat_y, lng_x, x_lng, y_lat},
    vector_tile::GeomType,
};
use rstar::{AABB, PointDistance, RTree, RTreeObject};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::{collections::BTreeMap, sync::Arc};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SuperclusterOptions {
    /// Min zoom to generate clusters on.
    pub min_zoom: u8,

    /// Max zoom to cluster the points on.
    pub max_zoom: u8,

    /// Minimum number of points to form a cluster.
    pub min_points: usize,

    /// Cluster radius in pixels.
    pub radius: f64,

    /// Tile extent, the radius is relative to it.
    pub extent: f64,

    /// Use the index of the input feature as its id.
    pub generate_id: bool,

    /// Custom cluster properties, `name: [operator or reduce expression, map expression]`.
    pub cluster_properties: Option<BTreeMap<String, (Value, Value)>>,
}

impl Default for SuperclusterOptions {
    fn default() -> Self {
        Self {
            min_zoom: 0,
            max_zoom: 16,
            min_points: 2,
            radius: 40.,
            extent: 512.,
            generate_id: false,
            cluster_properties: None,
        }
    }
}

const NO_CLUSTER: &str = "No cluster with the specified id.";

/// Point or cluster at some zoom level.
#[derive(Debug, Clone)]
struct ClusterNode {
    x: f64,
    y: f64,

    /// Set for clusters only.
    id: Option<u64>,

    /// Index of the input feature. For clusters, index of the node they originated from.
    index: usize,

    /// Cluster this node was absorbed into one zoom lower.
    parent_id: Option<u64>,

    num_points: usize,
    properties: Option<Properties>,
}

/// Coordinates are kept in single precision, like the tree they are indexed with.
fn fround(value: f64) -> f64 {
    f64::from(value as f32)
}

#[derive(Clone, Copy, Debug)]
struct TreePoint {
    index: usize,
    x: f64,
    y: f64,
}

impl RTreeObject for TreePoint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.x, self.y])
    }
}

impl PointDistance for TreePoint {
    #[inline]
    fn distance_2(&self, p: &[f64; 2]) -> f64 {
        let dx = self.x - p[0];
        let dy = self.y - p[1];
        dx * dx + dy * dy
    }
}

#[derive(Default)]
struct Level {
    nodes: Vec<ClusterNode>,
    tree: RTree<TreePoint>,
}

impl Level {
    fn new(nodes: Vec<ClusterNode>) -> Self {
        let points = nodes
            .iter()
            .enumerate()
            .map(|(index, node)| TreePoint {
                index,
                x: node.x,
                y: node.y,
            })
            .collect();
        Self {
            nodes,
            tree: RTree::bulk_load(points),
        }
    }

    fn within(&self, x: f64, y: f64, radius: f64) -> impl Iterator<Item = usize> + '_ {
        self.tree
            .locate_within_distance([x, y], radius * radius)
            .map(|point| point.index)
    }

    fn range(&self, min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Vec<usize> {
        let envelope = AABB::from_corners([min_x, min_y], [max_x, max_y]);
        let mut indices: Vec<usize> = self
            .tree
            .locate_in_envelope(&envelope)
            .map(|point| point.index)
            .collect();
        indices.sort_unstable();
        indices
    }
}

/// Compiled `cluster_properties`.
struct Reducer {
    properties: Vec<(String, Expression, Expression)>,
}

impl Reducer {
    fn new(cluster_properties: &BTreeMap<String, (Value, Value)>) -> Result<Self, expression::Error> {
        let properties = cluster_properties
            .iter()
            .map(|(key, (operator, map))| {
                let reduce = match operator {
                    Value::String(operator) => json!([operator, ["accumulated"], ["get", key]]),
                    expression => expression.clone(),
                };
                Ok((key.clone(), Expression::compile(map)?, Expression::compile(&reduce)?))
            })
            .collect::<Result<_, expression::Error>>()?;
        Ok(Self { properties })
    }

    fn map(&self, properties: &Properties) -> Properties {
        let context = Context::new(0., properties);
        self.properties
            .iter()
            .map(|(key, map, _)| (key.clone(), evaluate_or_null(map, &context)))
            .collect()
    }

    fn reduce(&self, accumulated: &mut Properties, properties: &Properties) {
        for (key, _, reduce) in &self.properties {
            let previous = accumulated.get(key).cloned().unwrap_or(Value::Null);
            let context = Context::new(0., properties).with_accumulated(&previous);
            let value = evaluate_or_null(reduce, &context);
            accumulated.insert(key.clone(), value);
        }
    }
}

fn evaluate_or_null(expression: &Expression, context: &Context<'_>) -> Value {
    expression.evaluate(context).unwrap_or_else(|error| {
        log::debug!("Cluster property {} failed: {error}", expression.value());
        Value::Null
    })
}

pub struct Supercluster {
    options: SuperclusterOptions,
    points: Vec<Feature>,
    /// One per zoom, up to `max_zoom + 1` which holds the input points.
    levels: Vec<Level>,
    reducer: Option<Reducer>,
}

impl Supercluster {
    /// Build the whole cluster hierarchy for the given features. Features without a point
    /// geometry are not clustered.
    ///
    /// # Errors
    ///
    /// When the zoom range is invalid, or a cluster property expression does not compile.
    pub fn new(points: Vec<Feature>, options: SuperclusterOptions) -> Result<Self, Error> {
        if options.max_zoom > crate::geojson_vt::MAX_ZOOM || options.min_zoom > options.max_zoom {
            return Err(Error::Configuration(format!(
                "Invalid cluster zoom range: {}-{}",
                options.min_zoom, options.max_zoom
            )));
        }

        let reducer = options
            .cluster_properties
            .as_ref()
            .map(Reducer::new)
            .transpose()
            .map_err(|error| Error::Configuration(format!("Invalid cluster property: {error}")))?;

        let mut index = Self {
            levels: Vec::new(),
            options,
            points,
            reducer,
        };
        index.load();
        Ok(index)
    }

    fn load(&mut self) {
        let SuperclusterOptions {
            min_zoom, max_zoom, ..
        } = self.options;

        let mut nodes: Vec<ClusterNode> = self
            .points
            .iter()
            .enumerate()
            .filter_map(|(index, feature)| match &feature.geometry {
                Some(Geometry::Point { coordinates }) => Some(ClusterNode {
                    x: fround(lng_x(coordinates.0)),
                    y: fround(lat_y(coordinates.1)),
                    id: None,
                    index,
                    parent_id: None,
                    num_points: 1,
                    properties: None,
                }),
                _ => None,
            })
            .collect();

        log::debug!("Clustering {} points.", nodes.len());

        let mut levels: Vec<Level> = (0..=usize::from(max_zoom) + 1)
            .map(|_| Level::default())
            .collect();
        let mut input = Level::new(nodes);

        for zoom in (min_zoom..=max_zoom).rev() {
            nodes = self.cluster(&mut input, zoom);
            log::trace!("z{zoom}: {} clusters", nodes.len());
            levels[usize::from(zoom) + 1] = input;
            input = Level::new(nodes);
        }

        levels[usize::from(min_zoom)] = input;
        self.levels = levels;
    }

    fn cluster(&self, input: &mut Level, zoom: u8) -> Vec<ClusterNode> {
        let SuperclusterOptions {
            radius,
            extent,
            min_points,
            ..
        } = self.options;
        let r = radius / (extent * 2_f64.powi(i32::from(zoom)));

        let mut visited = vec![false; input.nodes.len()];
        let mut clusters = Vec::new();

        for i in 0..input.nodes.len() {
            if visited[i] {
                continue;
            }
            visited[i] = true;

            let origin = &input.nodes[i];
            let neighbors: Vec<usize> = input
                .within(origin.x, origin.y, r)
                .filter(|&n| !visited[n])
                .collect();

            let origin_points = origin.num_points;
            let num_points = origin_points
                + neighbors
                    .iter()
                    .map(|&n| input.nodes[n].num_points)
                    .sum::<usize>();

            if num_points > origin_points && num_points >= min_points {
                let mut wx = origin.x * origin_points as f64;
                let mut wy = origin.y * origin_points as f64;
                let mut properties = self.reducer.as_ref().map(|reducer| self.map(reducer, origin));

                // Encodes the index of the origin node and the zoom, offset by the number
                // of input features.
                let id = ((i as u64) << 5) + u64::from(zoom) + 1 + self.points.len() as u64;

                for &n in &neighbors {
                    visited[n] = true;

                    if let (Some(reducer), Some(accumulated)) = (&self.reducer, &mut properties) {
                        let mapped = self.map(reducer, &input.nodes[n]);
                        reducer.reduce(accumulated, &mapped);
                    }

                    let neighbor = &mut input.nodes[n];
                    wx += neighbor.x * neighbor.num_points as f64;
                    wy += neighbor.y * neighbor.num_points as f64;
                    neighbor.parent_id = Some(id);
                }

                input.nodes[i].parent_id = Some(id);
                clusters.push(ClusterNode {
                    x: fround(wx / num_points as f64),
                    y: fround(wy / num_points as f64),
                    id: Some(id),
                    index: i,
                    parent_id: None,
                    num_points,
                    properties,
                });
            } else {
                clusters.push(origin.clone());

                if num_points > 1 {
                    for &n in &neighbors {
                        visited[n] = true;
                        clusters.push(input.nodes[n].clone());
                    }
                }
            }
        }

        clusters
    }

    /// Properties to reduce for a node. Clusters already carry reduced ones.
    fn map(&self, reducer: &Reducer, node: &ClusterNode) -> Properties {
        if node.id.is_some() {
            return node.properties.clone().unwrap_or_default();
        }
        match &self.points[node.index].properties {
            Some(properties) => reducer.map(properties),
            None => reducer.map(&Properties::new()),
        }
    }

    fn limit_zoom(&self, zoom: u8) -> usize {
        usize::from(zoom.clamp(self.options.min_zoom, self.options.max_zoom + 1))
    }

    /// Clusters and points within `[west, south, east, north]` at the given zoom. Boxes
    /// crossing the antimeridian are queried as two.
    pub fn get_clusters(&self, bbox: [f64; 4], zoom: u8) -> Vec<Feature> {
        let wrap = |lng: f64| ((lng + 180.) % 360. + 360.) % 360. - 180.;

        let mut min_lng = wrap(bbox[0]);
        let min_lat = bbox[1].clamp(-90., 90.);
        let mut max_lng = if bbox[2] == 180. { 180. } else { wrap(bbox[2]) };
        let max_lat = bbox[3].clamp(-90., 90.);

        if bbox[2] - bbox[0] >= 360. {
            min_lng = -180.;
            max_lng = 180.;
        } else if min_lng > max_lng {
            let mut clusters = self.get_clusters([min_lng, min_lat, 180., max_lat], zoom);
            clusters.extend(self.get_clusters([-180., min_lat, max_lng, max_lat], zoom));
            return clusters;
        }

        let level = &self.levels[self.limit_zoom(zoom)];
        level
            .range(lng_x(min_lng), lat_y(max_lat), lng_x(max_lng), lat_y(min_lat))
            .into_iter()
            .map(|index| self.node_feature(&level.nodes[index]))
            .collect()
    }

    /// Clusters and points one zoom below the cluster.
    ///
    /// # Errors
    ///
    /// When there is no cluster with the given id.
    pub fn get_children(&self, cluster_id: u64) -> Result<Vec<Feature>, Error> {
        let not_found = || Error::Query(NO_CLUSTER.to_owned());

        let origin_id = self.origin_id(cluster_id).ok_or_else(not_found)?;
        let origin_zoom = self.origin_zoom(cluster_id).ok_or_else(not_found)?;

        let level = self.levels.get(usize::from(origin_zoom)).ok_or_else(not_found)?;
        let origin = level.nodes.get(origin_id).ok_or_else(not_found)?;

        let r = self.options.radius
            / (self.options.extent * 2_f64.powi(i32::from(origin_zoom) - 1));

        let mut indices: Vec<usize> = level.within(origin.x, origin.y, r).collect();
        indices.sort_unstable();

        let children: Vec<Feature> = indices
            .into_iter()
            .map(|index| &level.nodes[index])
            .filter(|node| node.parent_id == Some(cluster_id))
            .map(|node| self.node_feature(node))
            .collect();

        if children.is_empty() {
            return Err(not_found());
        }
        Ok(children)
    }

    /// Input points of the cluster, paginated.
    ///
    /// # Errors
    ///
    /// When there is no cluster with the given id.
    pub fn get_leaves(
        &self,
        cluster_id: u64,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<Feature>, Error> {
        let limit = limit.unwrap_or(10);
        let offset = offset.unwrap_or(0);

        let mut leaves = Vec::new();
        self.append_leaves(&mut leaves, cluster_id, limit, offset, 0)?;
        Ok(leaves)
    }

    fn append_leaves(
        &self,
        result: &mut Vec<Feature>,
        cluster_id: u64,
        limit: usize,
        offset: usize,
        mut skipped: usize,
    ) -> Result<usize, Error> {
        for child in self.get_children(cluster_id)? {
            match cluster_info(&child) {
                Some((child_id, point_count)) => {
                    if skipped + point_count <= offset {
                        skipped += point_count;
                    } else {
                        skipped = self.append_leaves(result, child_id, limit, offset, skipped)?;
                    }
                }
                None if skipped < offset => skipped += 1,
                None => result.push(child),
            }
            if result.len() == limit {
                break;
            }
        }
        Ok(skipped)
    }

    /// Zoom at which the cluster expands into more than one child.
    ///
    /// # Errors
    ///
    /// When there is no cluster with the given id.
    pub fn get_cluster_expansion_zoom(&self, mut cluster_id: u64) -> Result<u8, Error> {
        let mut expansion_zoom = self
            .origin_zoom(cluster_id)
            .ok_or_else(|| Error::Query(NO_CLUSTER.to_owned()))?
            .saturating_sub(1);

        while expansion_zoom <= self.options.max_zoom {
            let children = self.get_children(cluster_id)?;
            expansion_zoom += 1;

            match children.as_slice() {
                [only] => match cluster_info(only) {
                    Some((child_id, _)) => cluster_id = child_id,
                    None => break,
                },
                _ => break,
            }
        }

        Ok(expansion_zoom)
    }

    /// Features of a tile, in tile coordinates. `None` if there is nothing there.
    pub fn get_tile(&self, z: u8, x: u32, y: u32) -> Option<Vec<TileFeature>> {
        let level = &self.levels[self.limit_zoom(z)];
        let z2 = 2_f64.powi(i32::from(z));
        let p = self.options.radius / self.options.extent;
        let (x, y) = (f64::from(x), f64::from(y));
        let top = (y - p) / z2;
        let bottom = (y + 1. + p) / z2;

        let mut features = Vec::new();

        self.add_tile_features(
            &mut features,
            level,
            level.range((x - p) / z2, top, (x + 1. + p) / z2, bottom),
            x,
            y,
            z2,
        );

        if x == 0. {
            self.add_tile_features(
                &mut features,
                level,
                level.range(1. - p / z2, top, 1., bottom),
                z2,
                y,
                z2,
            );
        }
        if x == z2 - 1. {
            self.add_tile_features(
                &mut features,
                level,
                level.range(0., top, p / z2, bottom),
                -1.,
                y,
                z2,
            );
        }

        (!features.is_empty()).then_some(features)
    }

    fn add_tile_features(
        &self,
        features: &mut Vec<TileFeature>,
        level: &Level,
        indices: Vec<usize>,
        x: f64,
        y: f64,
        z2: f64,
    ) {
        let extent = self.options.extent;

        for index in indices {
            let node = &level.nodes[index];

            let (tags, px, py, id) = match node.id {
                Some(id) => (cluster_properties(node), node.x, node.y, Some(Value::from(id))),
                None => {
                    let point = &self.points[node.index];
                    let Some(Geometry::Point { coordinates }) = &point.geometry else {
                        continue;
                    };
                    let id = if self.options.generate_id {
                        Some(Value::from(node.index))
                    } else {
                        point.id.clone()
                    };
                    (
                        point.properties.clone().unwrap_or_default(),
                        lng_x(coordinates.0),
                        lat_y(coordinates.1),
                        id,
                    )
                }
            };

            features.push(TileFeature {
                id,
                kind: GeomType::Point,
                geometry: vec![vec![[
                    (extent * (px * z2 - x)).round() as i32,
                    (extent * (py * z2 - y)).round() as i32,
                ]]],
                tags: Arc::new(tags),
            });
        }
    }

    fn node_feature(&self, node: &ClusterNode) -> Feature {
        match node.id {
            Some(id) => Feature::new(Geometry::Point {
                coordinates: Position(x_lng(node.x), y_lat(node.y)),
            })
            .with_id(id)
            .with_properties(cluster_properties(node)),
            None => self.points[node.index].clone(),
        }
    }

    fn origin_id(&self, cluster_id: u64) -> Option<usize> {
        let offset = cluster_id.checked_sub(self.points.len() as u64)?;
        usize::try_from(offset >> 5).ok()
    }

    fn origin_zoom(&self, cluster_id: u64) -> Option<u8> {
        let offset = cluster_id.checked_sub(self.points.len() as u64)?;
        u8::try_from(offset % 32).ok()
    }
}

fn cluster_properties(node: &ClusterNode) -> Properties {
    let count = node.num_points;
    let abbreviated = if count >= 10_000 {
        Value::from(format!("{}k", (count as f64 / 1000.).round()))
    } else if count >= 1000 {
        Value::from(format!("{}k", (count as f64 / 100.).round() / 10.))
    } else {
        Value::from(count)
    };

    let mut properties = node.properties.clone().unwrap_or_default();
    properties.insert("cluster".to_owned(), Value::Bool(true));
    properties.insert("cluster_id".to_owned(), Value::from(node.id));
    properties.insert("point_count".to_owned(), Value::from(count));
    properties.insert("point_count_abbreviated".to_owned(), abbreviated);
    properties
}

/// Id and size of a cluster feature, `None` for input points.
fn cluster_info(feature: &Feature) -> Option<(u64, usize)> {
    let properties = feature.properties.as_ref()?;
    if properties.get("cluster") != Some(&Value::Bool(true)) {
        return None;
    }
    let id = properties.get("cluster_id")?.as_u64()?;
    let count = properties.get("point_count")?.as_u64()?;
    Some((id, usize::try_from(count).ok()?))
}
