//! Clustered campground map.
//!
//! The drawing and the clustering itself belong to the mapping library; this
//! module only reads the embedded configuration block, declares the source and
//! layers, and reacts to clicks and hovers. The library is reached through
//! [`MapSurface`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::models::Geometry;
use crate::views::{Feature, DEFAULT_CENTER};

pub const STYLE: &str = "mapbox://styles/mapbox/outdoors-v12";
pub const ZOOM: f64 = 3.0;
pub const CLUSTER_MAX_ZOOM: u32 = 14;
pub const CLUSTER_RADIUS: u32 = 50;

pub const SOURCE_ID: &str = "campgrounds";
pub const CLUSTERS_LAYER: &str = "clusters";
pub const CLUSTER_COUNT_LAYER: &str = "cluster-count";
pub const POINT_LAYER: &str = "unclustered-point";

const CLUSTER_COLORS: [&str; 3] = ["#51bbd6", "#f1f075", "#f28cb1"];
const CLUSTER_STEPS: [u32; 2] = [100, 750];
const CLUSTER_RADII: [u32; 3] = [20, 30, 40];
const CLUSTER_HOVER_RADII: [u32; 3] = [22, 32, 42];
const POINT_COLOR: &str = "#11b4da";
const POINT_HOVER_COLOR: &str = "#0d6efd";
const STROKE_COLOR: &str = "#ffffff";

#[derive(Error, Debug)]
pub enum MapError {
    #[error("map config not found")]
    MissingConfig,

    #[error("map config is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("map token missing")]
    MissingToken,

    #[error("cluster expansion failed: {0}")]
    ClusterExpansion(String),
}

/// The page-embedded data block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapConfig {
    #[serde(default)]
    pub map_token: String,
    #[serde(default)]
    pub campgrounds: Vec<Feature>,
}

impl MapConfig {
    pub fn from_block(block: Option<&str>) -> Result<Self, MapError> {
        let block = block.ok_or(MapError::MissingConfig)?;
        let config: MapConfig = serde_json::from_str(block)?;
        if config.map_token.trim().is_empty() {
            return Err(MapError::MissingToken);
        }
        Ok(config)
    }
}

/// Construction options handed to the mapping library.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapOptions {
    pub access_token: String,
    pub container: &'static str,
    pub style: &'static str,
    pub center: [f64; 2],
    pub zoom: f64,
    pub antialias: bool,
    pub attribution_control: bool,
    pub fail_if_major_performance_caveat: bool,
    pub preserve_drawing_buffer: bool,
    pub max_tile_cache_size: u32,
}

impl MapOptions {
    fn new(access_token: &str) -> Self {
        Self {
            access_token: access_token.to_string(),
            container: "map",
            style: STYLE,
            center: DEFAULT_CENTER,
            zoom: ZOOM,
            antialias: false,
            attribution_control: true,
            fail_if_major_performance_caveat: false,
            preserve_drawing_buffer: true,
            max_tile_cache_size: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

/// A feature as reported by the library for a click or a query.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedFeature {
    pub geometry: Geometry,
    pub properties: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Popup {
    pub lng_lat: [f64; 2],
    pub html: String,
    pub close_button: bool,
    pub close_on_click: bool,
    pub max_width: &'static str,
}

/// The operations the map needs from the underlying mapping library.
pub trait MapSurface {
    fn add_source(&mut self, id: &str, source: Value);
    fn add_layer(&mut self, layer: Value);
    fn set_paint_property(&mut self, layer: &str, name: &str, value: Value);
    fn set_cursor(&mut self, cursor: &str);
    fn query_rendered_features(&self, point: ScreenPoint, layer: &str) -> Vec<RenderedFeature>;
    fn cluster_expansion_zoom(&self, source: &str, cluster_id: u64) -> Result<f64, MapError>;
    fn ease_to(&mut self, center: [f64; 2], zoom: f64);
    fn close_popups(&mut self);
    fn open_popup(&mut self, popup: Popup);
}

#[derive(Debug, Clone)]
pub enum MapEvent {
    Load,
    Click {
        layer: String,
        point: ScreenPoint,
        features: Vec<RenderedFeature>,
    },
    MouseEnter {
        layer: String,
    },
    MouseLeave {
        layer: String,
    },
}

fn step_by_count<T: Serialize>(values: [T; 3]) -> Value {
    let [low, mid, high] = values;
    json!([
        "step",
        ["get", "point_count"],
        low,
        CLUSTER_STEPS[0],
        mid,
        CLUSTER_STEPS[1],
        high
    ])
}

/// Clustered GeoJSON source for the given features.
pub fn source_spec(features: &[Feature]) -> Value {
    json!({
        "type": "geojson",
        "data": {
            "type": "FeatureCollection",
            "features": features,
        },
        "cluster": true,
        "clusterMaxZoom": CLUSTER_MAX_ZOOM,
        "clusterRadius": CLUSTER_RADIUS,
        "promoteId": "id",
    })
}

/// Cluster circles, cluster count labels and single points, in draw order.
pub fn layer_specs() -> [Value; 3] {
    [
        json!({
            "id": CLUSTERS_LAYER,
            "type": "circle",
            "source": SOURCE_ID,
            "filter": ["has", "point_count"],
            "paint": {
                "circle-color": step_by_count(CLUSTER_COLORS),
                "circle-radius": step_by_count(CLUSTER_RADII),
                "circle-stroke-width": 0,
                "circle-stroke-color": STROKE_COLOR,
                "circle-emissive-strength": 1,
            },
        }),
        json!({
            "id": CLUSTER_COUNT_LAYER,
            "type": "symbol",
            "source": SOURCE_ID,
            "filter": ["has", "point_count"],
            "layout": {
                "text-field": ["get", "point_count_abbreviated"],
                "text-font": ["DIN Offc Pro Medium", "Arial Unicode MS Bold"],
                "text-size": 12,
            },
        }),
        json!({
            "id": POINT_LAYER,
            "type": "circle",
            "source": SOURCE_ID,
            "filter": ["!", ["has", "point_count"]],
            "paint": {
                "circle-color": POINT_COLOR,
                "circle-radius": 6,
                "circle-stroke-width": 1,
                "circle-stroke-color": STROKE_COLOR,
                "circle-emissive-strength": 1,
            },
        }),
    ]
}

pub struct ClusterMap<S> {
    config: MapConfig,
    surface: S,
}

impl<S: MapSurface> ClusterMap<S> {
    /// Reads the configuration block and opens the map with `open`. Returns
    /// `None`, after logging, when the block is missing, malformed or has no
    /// token; no map is created in that case.
    pub fn init(block: Option<&str>, open: impl FnOnce(&MapOptions) -> S) -> Option<Self> {
        let config = match MapConfig::from_block(block) {
            Ok(config) => config,
            Err(err) => {
                error!("failed to load map configuration: {err}");
                return None;
            }
        };

        let surface = open(&MapOptions::new(&config.map_token));
        debug!(features = config.campgrounds.len(), "map created");
        Some(Self { config, surface })
    }

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn handle(&mut self, event: MapEvent) {
        match event {
            MapEvent::Load => self.setup_layers(),
            MapEvent::Click { layer, point, features } => match layer.as_str() {
                CLUSTERS_LAYER => self.cluster_click(point),
                POINT_LAYER => self.point_click(&features),
                _ => {}
            },
            MapEvent::MouseEnter { layer } => self.hover(&layer, true),
            MapEvent::MouseLeave { layer } => self.hover(&layer, false),
        }
    }

    fn setup_layers(&mut self) {
        self.surface
            .add_source(SOURCE_ID, source_spec(&self.config.campgrounds));
        for layer in layer_specs() {
            self.surface.add_layer(layer);
        }
    }

    fn cluster_click(&mut self, point: ScreenPoint) {
        let features = self.surface.query_rendered_features(point, CLUSTERS_LAYER);
        let Some(cluster) = features.first() else {
            return;
        };
        let Some(cluster_id) = cluster.properties.get("cluster_id").and_then(Value::as_u64) else {
            warn!("clicked cluster has no cluster_id");
            return;
        };

        match self.surface.cluster_expansion_zoom(SOURCE_ID, cluster_id) {
            Ok(zoom) => self.surface.ease_to(cluster.geometry.coordinates(), zoom),
            Err(err) => error!("cluster expansion error: {err}"),
        }
    }

    fn point_click(&mut self, features: &[RenderedFeature]) {
        let Some(feature) = features.first() else {
            return;
        };
        let html = feature
            .properties
            .get("popUpMarkup")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        self.surface.close_popups();
        self.surface.open_popup(Popup {
            lng_lat: feature.geometry.coordinates(),
            html,
            close_button: true,
            close_on_click: false,
            max_width: "300px",
        });
    }

    fn hover(&mut self, layer: &str, entering: bool) {
        let cursor = if entering { "pointer" } else { "" };
        match layer {
            CLUSTERS_LAYER => {
                self.surface.set_cursor(cursor);
                self.highlight_cluster(entering);
            }
            POINT_LAYER => {
                self.surface.set_cursor(cursor);
                self.highlight_point(entering);
            }
            _ => {}
        }
    }

    fn highlight_cluster(&mut self, on: bool) {
        let (stroke, radii) = if on {
            (3, CLUSTER_HOVER_RADII)
        } else {
            (0, CLUSTER_RADII)
        };
        let s = &mut self.surface;
        s.set_paint_property(CLUSTERS_LAYER, "circle-stroke-width", json!(stroke));
        s.set_paint_property(CLUSTERS_LAYER, "circle-stroke-color", json!(STROKE_COLOR));
        s.set_paint_property(CLUSTERS_LAYER, "circle-radius", step_by_count(radii));
    }

    fn highlight_point(&mut self, on: bool) {
        let (radius, stroke, color) = if on {
            (8, 2, POINT_HOVER_COLOR)
        } else {
            (6, 1, POINT_COLOR)
        };
        let s = &mut self.surface;
        s.set_paint_property(POINT_LAYER, "circle-radius", json!(radius));
        s.set_paint_property(POINT_LAYER, "circle-stroke-width", json!(stroke));
        s.set_paint_property(POINT_LAYER, "circle-color", json!(color));
        s.set_paint_property(POINT_LAYER, "circle-stroke-color", json!(STROKE_COLOR));
    }
}
