use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::collect::global_variables::NDVI_BAND;
use crate::config::EarthEngineConfig;
use crate::geo_core::{Coordinate, DateRange};
use crate::geometric::index_query::{CompositeStrategy, QueryParameters};

/// Argument name bound by the NDVI mapping function
const MAPPING_VAR: &str = "_MAPPING_VAR_0_0";

/// Reference to a node stored in an `ExpressionGraph`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueRef(String);

impl ValueRef {
    /// `{"valueReference": id}` argument
    pub fn arg(&self) -> Value {
        json!({ "valueReference": self.0 })
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

/// Serialized Earth Engine computation graph
/// Nodes live in a flat `values` table and reference each other by id,
/// which is the shape `value:compute` and `maps` expect
#[derive(Debug, Default)]
pub struct ExpressionGraph {
    values: BTreeMap<String, Value>,
}

impl ExpressionGraph {
    pub fn new() -> Self {
        ExpressionGraph::default()
    }

    fn push(&mut self, node: Value) -> ValueRef {
        let id = self.values.len().to_string();
        self.values.insert(id.clone(), node);
        ValueRef(id)
    }

    /// Add a call to a server-side algorithm
    pub fn invoke(&mut self, function_name: &str, arguments: Vec<(&str, Value)>) -> ValueRef {
        let arguments: Map<String, Value> = arguments
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        self.push(json!({
            "functionInvocationValue": {
                "functionName": function_name,
                "arguments": arguments,
            }
        }))
    }

    /// Inline function definition whose body is an existing node
    pub fn function(&self, argument_names: &[&str], body: &ValueRef) -> Value {
        json!({
            "functionDefinitionValue": {
                "argumentNames": argument_names,
                "body": body.id(),
            }
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Final `{"result": id, "values": {...}}` expression
    pub fn into_expression(self, result: &ValueRef) -> Value {
        json!({
            "result": result.id(),
            "values": self.values,
        })
    }
}

pub fn constant<T: Serialize>(value: T) -> Value {
    json!({ "constantValue": value })
}

/// Reference to a function argument, only valid inside a function body
pub fn argument(name: &str) -> Value {
    json!({ "argumentReference": name })
}

/// Filtered catalog reduced to a single NDVI image, following the configured strategy
pub fn ndvi_image(
    graph: &mut ExpressionGraph,
    settings: &EarthEngineConfig,
    region: &ValueRef,
    date_range: &DateRange,
    parameters: &QueryParameters,
) -> ValueRef {
    let collection = graph.invoke(
        "ImageCollection.load",
        vec![("id", constant(&settings.collection))],
    );

    let bounds = graph.invoke(
        "Filter.intersects",
        vec![("leftField", constant(".all")), ("rightValue", region.arg())],
    );
    let collection = graph.invoke(
        "Collection.filter",
        vec![("collection", collection.arg()), ("filter", bounds.arg())],
    );

    let range = graph.invoke(
        "DateRange",
        vec![
            ("start", constant(date_range.start_str())),
            ("end", constant(date_range.end_str())),
        ],
    );
    let dates = graph.invoke(
        "Filter.dateRangeContains",
        vec![
            ("leftValue", range.arg()),
            ("rightField", constant("system:time_start")),
        ],
    );
    let collection = graph.invoke(
        "Collection.filter",
        vec![("collection", collection.arg()), ("filter", dates.arg())],
    );

    let clouds = graph.invoke(
        "Filter.lessThan",
        vec![
            ("leftField", constant(&settings.cloud_property)),
            ("rightValue", constant(parameters.cloud_cover_max)),
        ],
    );
    let collection = graph.invoke(
        "Collection.filter",
        vec![("collection", collection.arg()), ("filter", clouds.arg())],
    );

    let bands = [settings.nir_band.as_str(), settings.red_band.as_str()];
    match parameters.strategy {
        CompositeStrategy::Median => {
            let nd = graph.invoke(
                "Image.normalizedDifference",
                vec![("input", argument(MAPPING_VAR)), ("bandNames", constant(bands))],
            );
            let renamed = graph.invoke(
                "Image.rename",
                vec![("input", nd.arg()), ("names", constant([NDVI_BAND]))],
            );
            let mapper = graph.function(&[MAPPING_VAR], &renamed);
            let mapped = graph.invoke(
                "Collection.map",
                vec![("collection", collection.arg()), ("baseAlgorithm", mapper)],
            );
            graph.invoke("reduce.median", vec![("collection", mapped.arg())])
        }
        CompositeStrategy::LowestCloud => {
            let sorted = graph.invoke(
                "Collection.limit",
                vec![
                    ("collection", collection.arg()),
                    ("key", constant(&settings.cloud_property)),
                    ("ascending", constant(true)),
                ],
            );
            let first = graph.invoke("Collection.first", vec![("collection", sorted.arg())]);
            let nd = graph.invoke(
                "Image.normalizedDifference",
                vec![("input", first.arg()), ("bandNames", constant(bands))],
            );
            graph.invoke(
                "Image.rename",
                vec![("input", nd.arg()), ("names", constant([NDVI_BAND]))],
            )
        }
    }
}

/// Dictionary `{NDVI: mean}` over a disc around one point
pub fn mean_ndvi_expression(
    settings: &EarthEngineConfig,
    coordinate: &Coordinate,
    date_range: &DateRange,
    parameters: &QueryParameters,
) -> Value {
    let mut graph = ExpressionGraph::new();
    let point = graph.invoke(
        "GeometryConstructors.Point",
        vec![("coordinates", constant(coordinate.lon_lat()))],
    );
    let image = ndvi_image(&mut graph, settings, &point, date_range, parameters);
    let disc = graph.invoke(
        "Geometry.buffer",
        vec![
            ("geometry", point.arg()),
            ("distance", constant(parameters.buffer_radius_m)),
        ],
    );
    let reducer = graph.invoke("Reducer.mean", vec![]);
    let stats = graph.invoke(
        "Image.reduceRegion",
        vec![
            ("image", image.arg()),
            ("reducer", reducer.arg()),
            ("geometry", disc.arg()),
            ("scale", constant(parameters.scale_m)),
        ],
    );
    graph.into_expression(&stats)
}

/// NDVI composite over every input point, for the map layer
pub fn ndvi_layer_expression(
    settings: &EarthEngineConfig,
    coordinates: &[Coordinate],
    date_range: &DateRange,
    parameters: &QueryParameters,
) -> Value {
    let mut graph = ExpressionGraph::new();
    let lon_lats: Vec<[f64; 2]> = coordinates.iter().map(Coordinate::lon_lat).collect();
    let points = graph.invoke(
        "GeometryConstructors.MultiPoint",
        vec![("coordinates", constant(lon_lats))],
    );
    let image = ndvi_image(&mut graph, settings, &points, date_range, parameters);
    graph.into_expression(&image)
}
