use crate::config::RenderConfig;
use crate::geo_join::GeoJoin;
use crate::selection::SelectionState;
use crate::types::GeoRow;
use serde::Serialize;
use serde_json::{json, Value};
use std::cmp::Ordering;

pub const NO_DATA_COLOR: &str = "#d9d9d9";
pub const NO_DATA_MESSAGE: &str = "No data for this selection";

const VEGA_LITE_SCHEMA: &str = "https://vega.github.io/schema/vega-lite/v5.json";
const VEGA_SCRIPTS: [&str; 3] = [
    "https://cdn.jsdelivr.net/npm/vega@5",
    "https://cdn.jsdelivr.net/npm/vega-lite@5",
    "https://cdn.jsdelivr.net/npm/vega-embed@6",
];

/// Where the map's country shapes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundarySource {
    /// TopoJSON fetched by the browser, joined through a lookup transform.
    Remote { url: String, feature: String },
    /// Shapes already bound in `GeoJoin::features`, embedded inline.
    Inline,
}

pub struct RenderOptions<'a> {
    pub config: &'a RenderConfig,
    pub boundaries: &'a BoundarySource,
    pub indicator_label: &'a str,
}

/// Map and bar chart built from one aggregate and one selection snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisualizationDocument {
    pub spec: Value,
    pub no_data: bool,
    // Bar order, highest percentage first
    pub ranking: Vec<String>,
}

/// Row of the data table both views draw from.
#[derive(Debug, Clone, PartialEq, Serialize)]
struct Mark<'a> {
    id: u32,
    country: &'a str,
    percentage: f64,
    label: String,
    respondents: usize,
    opacity: f64,
}

impl<'a> Mark<'a> {
    fn new(row: &'a GeoRow, selection: &SelectionState) -> Self {
        Self {
            id: row.id,
            country: &row.country,
            percentage: row.percentage,
            label: format_percentage(row.percentage),
            respondents: row.respondents,
            opacity: selection.opacity_for(row.id),
        }
    }
}

/// Tooltip text for a fraction, e.g. `0.6` -> `"60.0%"`.
pub fn format_percentage(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}

pub fn render(
    join: &GeoJoin,
    selection: &SelectionState,
    options: &RenderOptions<'_>,
) -> VisualizationDocument {
    // Selected countries absent from this result do not dim anything
    let selection = selection.visible_in(join.rows.iter().map(|row| row.id));
    let mut marks: Vec<Mark> = join.rows.iter().map(|row| Mark::new(row, &selection)).collect();
    marks.sort_by(|a, b| {
        b.percentage
            .partial_cmp(&a.percentage)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.country.cmp(b.country))
    });

    let no_data = marks.is_empty();
    let ranking: Vec<String> = marks.iter().map(|m| m.country.to_string()).collect();

    // Shapes without a row follow the same dimming as unselected marks
    let unmatched_opacity = if selection.is_empty() {
        1.0
    } else {
        crate::selection::DIMMED_OPACITY
    };

    let map = map_view(join, &marks, unmatched_opacity, options);
    let bars = if no_data {
        no_data_view(options)
    } else {
        bar_view(&marks, &ranking, options)
    };

    let title = if no_data {
        NO_DATA_MESSAGE.to_string()
    } else {
        options.config.title.clone()
    };

    let spec = json!({
        "$schema": VEGA_LITE_SCHEMA,
        "title": title,
        "params": [{ "name": "unmatched_opacity", "value": unmatched_opacity }],
        "hconcat": [map, bars],
        "config": { "view": { "stroke": null } },
    });

    VisualizationDocument {
        spec,
        no_data,
        ranking,
    }
}

fn color_encoding(field: &str, title: &str) -> Value {
    json!({
        "field": field,
        "type": "quantitative",
        "title": title,
        "scale": { "domain": [0, 1] },
        "legend": { "format": ".0%" },
        "condition": { "test": format!("!isValid(datum['{}'])", field), "value": NO_DATA_COLOR },
    })
}

fn map_view(
    join: &GeoJoin,
    marks: &[Mark],
    unmatched_opacity: f64,
    options: &RenderOptions<'_>,
) -> Value {
    let config = options.config;
    let (data, transform) = match options.boundaries {
        BoundarySource::Remote { url, feature } => (
            json!({ "url": url, "format": { "type": "topojson", "feature": feature } }),
            json!([
                {
                    "lookup": "id",
                    "from": {
                        "data": { "values": marks },
                        "key": "id",
                        "fields": ["country", "percentage", "label", "respondents", "opacity"],
                    },
                },
                {
                    "calculate": "isValid(datum.opacity) ? datum.opacity : unmatched_opacity",
                    "as": "opacity",
                },
            ]),
        ),
        BoundarySource::Inline => {
            let features: Vec<Value> = join
                .features
                .iter()
                .map(|feature| {
                    let mark = marks.iter().find(|m| m.id == feature.id);
                    json!({
                        "type": "Feature",
                        "id": feature.id,
                        "geometry": feature.geometry,
                        "country": mark.map(|m| m.country).or(feature.name.as_deref()),
                        "percentage": mark.map(|m| m.percentage),
                        "label": mark.map(|m| m.label.clone()).unwrap_or_else(|| "no data".to_string()),
                        "respondents": mark.map(|m| m.respondents),
                        "opacity": mark.map(|m| m.opacity).unwrap_or(unmatched_opacity),
                    })
                })
                .collect();
            (json!({ "values": features }), json!([]))
        }
    };

    json!({
        "width": config.width,
        "height": config.height,
        "data": data,
        "transform": transform,
        "projection": { "type": config.projection },
        "mark": { "type": "geoshape", "stroke": "white", "strokeWidth": 0.5 },
        "encoding": {
            "color": color_encoding("percentage", options.indicator_label),
            "opacity": { "field": "opacity", "type": "quantitative", "scale": null, "legend": null },
            "tooltip": [
                { "field": "country", "type": "nominal", "title": "Country" },
                { "field": "label", "type": "nominal", "title": options.indicator_label },
            ],
        },
    })
}

fn bar_view(marks: &[Mark], ranking: &[String], options: &RenderOptions<'_>) -> Value {
    json!({
        "width": options.config.width,
        "height": options.config.height,
        "data": { "values": marks },
        "mark": { "type": "bar", "cursor": "pointer" },
        "encoding": {
            "y": { "field": "country", "type": "nominal", "sort": ranking, "title": null },
            "x": {
                "field": "percentage",
                "type": "quantitative",
                "title": options.indicator_label,
                "scale": { "domain": [0, 1] },
                "axis": { "format": ".0%" },
            },
            "color": color_encoding("percentage", options.indicator_label),
            "opacity": { "field": "opacity", "type": "quantitative", "scale": null, "legend": null },
            "tooltip": [
                { "field": "country", "type": "nominal", "title": "Country" },
                { "field": "label", "type": "nominal", "title": options.indicator_label },
            ],
        },
    })
}

fn no_data_view(options: &RenderOptions<'_>) -> Value {
    json!({
        "width": options.config.width,
        "height": options.config.height,
        "data": { "values": [{ "message": NO_DATA_MESSAGE }] },
        "mark": { "type": "text", "fontSize": 16, "color": "#666666" },
        "encoding": { "text": { "field": "message", "type": "nominal" } },
    })
}

impl VisualizationDocument {
    /// Self-contained HTML fragment embedding both views.
    ///
    /// With a `session`, clicking a mark posts a toggle for its country id
    /// to `endpoint` and clicking anywhere else posts a clear; the spec
    /// returned by the dispatcher redraws both views. Without one the
    /// selection lives in the page and opacity is recomputed in place.
    /// Shapes without data count as "anywhere else".
    pub fn to_html(&self, endpoint: &str, session: Option<&str>) -> String {
        let container = format!(
            "share-map-{}",
            session
                .unwrap_or("static")
                .chars()
                .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
                .collect::<String>()
        );

        let mut html = format!("<div id=\"{}\"></div>\n", container);
        for src in VEGA_SCRIPTS {
            html.push_str(&format!("<script src=\"{}\"></script>\n", src));
        }

        html.push_str("<script>\n(function() {\n");
        html.push_str(&format!(
            "  const el = document.getElementById({});\n  let spec = {};\n",
            script_json(&json!(container)),
            script_json(&self.spec),
        ));
        html.push_str(HAS_DATA_JS);
        match session {
            Some(session) => {
                html.push_str(&format!(
                    "  const endpoint = {};\n  const session = {};\n",
                    script_json(&json!(endpoint)),
                    script_json(&json!(session)),
                ));
                html.push_str(SESSION_HANDLER_JS);
            }
            None => {
                html.push_str(&format!(
                    "  const dimmed = {};\n  let selected = [];\n",
                    crate::selection::DIMMED_OPACITY
                ));
                html.push_str(PAGE_HANDLER_JS);
            }
        }
        html.push_str(DRAW_JS);
        html.push_str("})();\n</script>\n");
        html
    }
}

const HAS_DATA_JS: &str = r#"  function hasData(datum) {
    return !!datum && datum.id !== undefined && datum.id !== null
      && datum.percentage !== undefined && datum.percentage !== null;
  }
"#;

const SESSION_HANDLER_JS: &str = r#"  function post(path, body) {
    return fetch(endpoint + path, {
      method: "POST",
      headers: { "Content-Type": "application/json" },
      body: JSON.stringify(body)
    }).then(function(r) { return r.json(); })
      .then(function(res) { if (res.spec) { spec = res.spec; draw(); } });
  }
  function onClick(event, item) {
    const datum = item && item.datum;
    if (hasData(datum)) {
      post("/api/selection/toggle", { session: session, id: datum.id });
    } else {
      post("/api/selection/clear", { session: session });
    }
  }
"#;

const PAGE_HANDLER_JS: &str = r#"  function tables() {
    const map = spec.hconcat[0];
    const bars = spec.hconcat[1];
    const out = [];
    if (map.transform && map.transform.length > 0) {
      out.push(map.transform[0].from.data.values);
    } else if (map.data && map.data.values) {
      out.push(map.data.values);
    }
    if (bars.data && bars.data.values) {
      out.push(bars.data.values);
    }
    return out;
  }
  function restyle() {
    const rows = tables();
    const present = [];
    rows.forEach(function(t) { t.forEach(function(d) { if (hasData(d)) { present.push(d.id); } }); });
    const active = selected.filter(function(id) { return present.indexOf(id) >= 0; });
    const unmatched = active.length === 0 ? 1 : dimmed;
    rows.forEach(function(t) {
      t.forEach(function(d) {
        if (d.id === undefined) { return; }
        if (!hasData(d)) {
          d.opacity = unmatched;
        } else {
          d.opacity = active.length === 0 || active.indexOf(d.id) >= 0 ? 1 : dimmed;
        }
      });
    });
    spec.params = [{ name: "unmatched_opacity", value: unmatched }];
  }
  function onClick(event, item) {
    const datum = item && item.datum;
    if (!hasData(datum)) {
      selected = [];
    } else if (selected.indexOf(datum.id) >= 0) {
      selected = selected.filter(function(id) { return id !== datum.id; });
    } else {
      selected.push(datum.id);
    }
    restyle();
    draw();
  }
"#;

const DRAW_JS: &str = r#"  function draw() {
    vegaEmbed(el, spec, { actions: false }).then(function(result) {
      result.view.addEventListener("click", onClick);
    });
  }
  draw();
"#;

// JSON safe to place inside a <script> element
fn script_json(value: &Value) -> String {
    value.to_string().replace("</", "<\\/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Boundary;
    use crate::geo_join::BoundFeature;
    use geojson::Geometry;

    fn geo_row(country: &str, id: u32, percentage: f64) -> GeoRow {
        GeoRow {
            country: country.to_string(),
            id,
            percentage,
            respondents: 10,
        }
    }

    fn join_of(rows: Vec<GeoRow>) -> GeoJoin {
        GeoJoin {
            rows,
            features: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    fn remote() -> BoundarySource {
        BoundarySource::Remote {
            url: "world-110m.json".to_string(),
            feature: "countries".to_string(),
        }
    }

    fn bar_values(doc: &VisualizationDocument) -> &Vec<Value> {
        doc.spec["hconcat"][1]["data"]["values"].as_array().unwrap()
    }

    #[test]
    fn bars_rank_by_percentage_descending() {
        let config = RenderConfig::default();
        let boundaries = remote();
        let options = RenderOptions {
            config: &config,
            boundaries: &boundaries,
            indicator_label: "computer use",
        };
        let join = join_of(vec![
            geo_row("Denmark", 208, 0.0),
            geo_row("Austria", 40, 0.6),
            geo_row("Germany", 276, 0.6),
            geo_row("Spain", 724, 0.9),
        ]);
        let doc = render(&join, &SelectionState::new(), &options);

        assert!(!doc.no_data);
        assert_eq!(doc.ranking, vec!["Spain", "Austria", "Germany", "Denmark"]);
        assert_eq!(
            doc.spec["hconcat"][1]["encoding"]["y"]["sort"],
            json!(["Spain", "Austria", "Germany", "Denmark"])
        );
    }

    #[test]
    fn tooltips_carry_one_decimal_percent() {
        assert_eq!(format_percentage(0.6), "60.0%");
        assert_eq!(format_percentage(0.12345), "12.3%");
        assert_eq!(format_percentage(0.0), "0.0%");

        let config = RenderConfig::default();
        let boundaries = remote();
        let options = RenderOptions {
            config: &config,
            boundaries: &boundaries,
            indicator_label: "computer use",
        };
        let doc = render(&join_of(vec![geo_row("Germany", 276, 0.6)]), &SelectionState::new(), &options);
        assert_eq!(bar_values(&doc)[0]["label"], "60.0%");
        assert_eq!(bar_values(&doc)[0]["country"], "Germany");
    }

    #[test]
    fn selection_dims_unselected_marks_in_both_views() {
        let config = RenderConfig::default();
        let boundaries = remote();
        let options = RenderOptions {
            config: &config,
            boundaries: &boundaries,
            indicator_label: "computer use",
        };
        let join = join_of(vec![geo_row("Germany", 276, 0.6), geo_row("Denmark", 208, 0.0)]);

        let mut selection = SelectionState::new();
        let doc = render(&join, &selection, &options);
        assert!(bar_values(&doc).iter().all(|v| v["opacity"] == 1.0));

        selection.toggle(208);
        let doc = render(&join, &selection, &options);
        let bars = bar_values(&doc);
        assert_eq!(bars[0]["country"], "Germany");
        assert_eq!(bars[0]["opacity"], crate::selection::DIMMED_OPACITY);
        assert_eq!(bars[1]["opacity"], 1.0);

        // The map looks up the same table
        let lookup = &doc.spec["hconcat"][0]["transform"][0]["from"]["data"]["values"];
        assert_eq!(lookup, &doc.spec["hconcat"][1]["data"]["values"]);
    }

    #[test]
    fn empty_aggregate_renders_no_data_state() {
        let config = RenderConfig::default();
        let boundaries = remote();
        let options = RenderOptions {
            config: &config,
            boundaries: &boundaries,
            indicator_label: "computer use",
        };
        let doc = render(&join_of(Vec::new()), &SelectionState::new(), &options);
        assert!(doc.no_data);
        assert_eq!(doc.spec["title"], NO_DATA_MESSAGE);
        assert_eq!(doc.spec["hconcat"][1]["mark"]["type"], "text");
        assert_eq!(doc.spec["hconcat"][0]["mark"]["type"], "geoshape");
    }

    #[test]
    fn inline_features_mark_missing_rows_as_no_data() {
        let config = RenderConfig::default();
        let boundaries = BoundarySource::Inline;
        let options = RenderOptions {
            config: &config,
            boundaries: &boundaries,
            indicator_label: "computer use",
        };
        let germany = geo_row("Germany", 276, 0.6);
        let shape = Geometry::new(geojson::Value::Point(vec![10.0, 51.0]));
        let boundary = Boundary {
            id: 40,
            name: Some("Austria".to_string()),
            geometry: shape.clone(),
        };
        let join = GeoJoin {
            rows: vec![germany.clone()],
            features: vec![
                BoundFeature {
                    id: 276,
                    name: Some("Germany".to_string()),
                    geometry: shape,
                    row: Some(germany),
                },
                BoundFeature {
                    id: boundary.id,
                    name: boundary.name.clone(),
                    geometry: boundary.geometry.clone(),
                    row: None,
                },
            ],
            diagnostics: Vec::new(),
        };
        let doc = render(&join, &SelectionState::new(), &options);
        let features = doc.spec["hconcat"][0]["data"]["values"].as_array().unwrap();
        assert_eq!(features[0]["percentage"], 0.6);
        assert_eq!(features[1]["percentage"], Value::Null);
        assert_eq!(features[1]["label"], "no data");
        assert_eq!(features[1]["country"], "Austria");
    }

    #[test]
    fn html_fragment_embeds_spec_and_handlers() {
        let config = RenderConfig::default();
        let boundaries = remote();
        let options = RenderOptions {
            config: &config,
            boundaries: &boundaries,
            indicator_label: "computer use",
        };
        let doc = render(&join_of(vec![geo_row("Germany", 276, 0.6)]), &SelectionState::new(), &options);
        let html = doc.to_html("http://localhost:8050", Some("s1"));
        assert!(html.contains("id=\"share-map-s1\""));
        assert!(html.contains("/api/selection/toggle"));
        assert!(html.contains("/api/selection/clear"));
        assert!(html.contains("\"Germany\""));
        assert!(!html.contains("restyle"));
    }

    #[test]
    fn static_fragment_keeps_selection_in_page() {
        let config = RenderConfig::default();
        let boundaries = remote();
        let options = RenderOptions {
            config: &config,
            boundaries: &boundaries,
            indicator_label: "computer use",
        };
        let doc = render(&join_of(vec![geo_row("Germany", 276, 0.6)]), &SelectionState::new(), &options);
        let html = doc.to_html("", None);
        assert!(html.contains("id=\"share-map-static\""));
        assert!(!html.contains("fetch("));
        assert!(!html.contains("/api/selection"));
        assert!(html.contains("function restyle()"));
        assert!(html.contains(&format!("const dimmed = {};", crate::selection::DIMMED_OPACITY)));
    }

    #[test]
    fn clicks_on_shapes_without_data_do_not_select() {
        let config = RenderConfig::default();
        let boundaries = remote();
        let options = RenderOptions {
            config: &config,
            boundaries: &boundaries,
            indicator_label: "computer use",
        };
        let doc = render(&join_of(vec![geo_row("Germany", 276, 0.6)]), &SelectionState::new(), &options);
        for html in [doc.to_html("", Some("s1")), doc.to_html("", None)] {
            assert!(html.contains("function hasData(datum)"));
            assert!(html.contains("datum.percentage !== null"));
            assert!(html.contains("if (hasData(datum))") || html.contains("if (!hasData(datum))"));
        }
    }

    #[test]
    fn selection_of_absent_country_has_no_effect() {
        let config = RenderConfig::default();
        let boundaries = remote();
        let options = RenderOptions {
            config: &config,
            boundaries: &boundaries,
            indicator_label: "computer use",
        };
        let mut selection = SelectionState::new();
        selection.toggle(208);

        let doc = render(&join_of(vec![geo_row("Germany", 276, 0.6)]), &selection, &options);
        assert_eq!(bar_values(&doc)[0]["opacity"], 1.0);
        assert_eq!(doc.spec["params"][0]["value"], 1.0);

        let doc = render(
            &join_of(vec![geo_row("Germany", 276, 0.6), geo_row("Denmark", 208, 0.0)]),
            &selection,
            &options,
        );
        assert_eq!(bar_values(&doc)[0]["opacity"], crate::selection::DIMMED_OPACITY);
        assert_eq!(bar_values(&doc)[1]["opacity"], 1.0);
        assert_eq!(doc.spec["params"][0]["value"], crate::selection::DIMMED_OPACITY);
    }
}
