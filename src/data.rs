use crate::config::{AppConfig, InputConfig};
use crate::error::PipelineError;
use crate::types::{Gender, IndicatorSet, Respondent};
use anyhow::{anyhow, Context, Result};
use csv::ReaderBuilder;
use geo::MultiPolygon;
use geojson::{GeoJson, Geometry};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{info, warn};

// Cell values treated as "no answer"
const MISSING_MARKERS: [&str; 6] = ["", "NA", "NaN", "nan", ".", "null"];

/// The loaded survey table. Never mutated after loading.
#[derive(Debug, Default)]
pub struct Dataset {
    respondents: Vec<Respondent>,
}

impl Dataset {
    pub fn new(respondents: Vec<Respondent>) -> Self {
        Self { respondents }
    }

    pub fn respondents(&self) -> &[Respondent] {
        &self.respondents
    }

    pub fn len(&self) -> usize {
        self.respondents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.respondents.is_empty()
    }
}

/// Country display name to numeric boundary id. Both sides are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountryRegistry {
    by_name: BTreeMap<String, u32>,
    by_id: BTreeMap<u32, String>,
}

impl CountryRegistry {
    pub fn new<I, S>(entries: I) -> Result<Self, PipelineError>
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let mut registry = Self::default();
        for (name, id) in entries {
            let name = name.into();
            if registry.by_name.contains_key(&name) {
                return Err(PipelineError::DuplicateCountry(name));
            }
            if let Some(existing) = registry.by_id.get(&id) {
                return Err(PipelineError::DuplicateCountryId(existing.clone(), name, id));
            }
            registry.by_id.insert(id, name.clone());
            registry.by_name.insert(name, id);
        }
        Ok(registry)
    }

    pub fn id_of(&self, country: &str) -> Option<u32> {
        self.by_name.get(country).copied()
    }

    pub fn name_of(&self, id: u32) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// A geographic boundary shape keyed by the registry's id scheme.
#[derive(Debug, Clone, PartialEq)]
pub struct Boundary {
    pub id: u32,
    pub name: Option<String>,
    pub geometry: Geometry,
}

pub fn load_dataset(config: &AppConfig, indicators: &IndicatorSet) -> Result<Dataset> {
    info!("Loading survey data from {:?}", config.input.data_csv);
    let file = File::open(&config.input.data_csv)
        .with_context(|| format!("Failed to open CSV file: {:?}", config.input.data_csv))?;
    let dataset = read_dataset(file, &config.input, indicators)?;
    info!("Loaded {} respondents", dataset.len());
    Ok(dataset)
}

/// Reads respondents from CSV. Rows with an unreadable age or gender are
/// skipped with a warning.
pub fn read_dataset<R: Read>(
    reader: R,
    input: &InputConfig,
    indicators: &IndicatorSet,
) -> Result<Dataset> {
    let mut rdr = ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = rdr.headers()?.clone();

    let col_indices: HashMap<&str, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h, i))
        .collect();
    let column = |name: &str| {
        col_indices
            .get(name)
            .copied()
            .ok_or_else(|| anyhow!("Column '{}' not found in CSV", name))
    };

    let age_idx = column(input.age.column())?;
    let gender_idx = column(&input.gender_column)?;
    let country_idx = column(&input.country_column)?;
    let indicator_cols = indicators
        .iter()
        .map(|ind| Ok((ind.name.clone(), column(&ind.column)?)))
        .collect::<Result<Vec<_>>>()?;

    let mut respondents = Vec::new();
    let mut skipped = 0usize;

    for (row, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read CSV row {}", row + 1))?;

        let age = record
            .get(age_idx)
            .and_then(parse_age)
            .and_then(|raw| input.age.age_from(raw));
        let gender = record.get(gender_idx).map(str::parse::<Gender>);
        let country = record.get(country_idx).unwrap_or("");

        let (age, gender) = match (age, gender) {
            (Some(age), Some(Ok(gender))) if !country.is_empty() => (age, gender),
            _ => {
                warn!("Skipping CSV row {}: unreadable age, gender or country", row + 1);
                skipped += 1;
                continue;
            }
        };

        let responses = indicator_cols
            .iter()
            .filter_map(|(name, idx)| {
                let value = record.get(*idx)?;
                if MISSING_MARKERS.contains(&value) {
                    None
                } else {
                    Some((name.clone(), value.to_string()))
                }
            })
            .collect();

        respondents.push(Respondent {
            age,
            gender,
            country: country.to_string(),
            responses,
        });
    }

    if skipped > 0 {
        warn!("Skipped {} unreadable CSV rows", skipped);
    }

    Ok(Dataset::new(respondents))
}

fn parse_age(value: &str) -> Option<i32> {
    value
        .parse::<i32>()
        .ok()
        .or_else(|| {
            value
                .parse::<f64>()
                .ok()
                .map(f64::round)
                .filter(|f| *f >= i32::MIN as f64 && *f <= i32::MAX as f64)
                .map(|f| f as i32)
        })
}

pub fn load_boundaries(path: &Path, join_column: &str) -> Result<Vec<Boundary>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s: &str| s.to_lowercase())
        .ok_or_else(|| anyhow!("Boundary file has no extension"))?;

    let boundaries = match extension.as_str() {
        "shp" => load_shapefile_boundaries(path, join_column)?,
        "json" | "geojson" => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open GeoJSON file: {:?}", path))?;
            read_geojson_boundaries(BufReader::new(file), join_column)?
        }
        _ => return Err(anyhow!("Unsupported geometry format: {}", extension)),
    };

    info!("Loaded {} boundary features from {:?}", boundaries.len(), path);
    Ok(boundaries)
}

fn load_shapefile_boundaries(path: &Path, join_column: &str) -> Result<Vec<Boundary>> {
    let mut reader = shapefile::Reader::from_path(path)
        .with_context(|| format!("Failed to open Shapefile: {:?}", path))?;

    let mut boundaries = Vec::new();

    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result?;

        let id_value = record
            .get(join_column)
            .ok_or_else(|| anyhow!("Join column '{}' not found in Shapefile", join_column))?;

        let Some(id) = shape_id(id_value) else {
            continue;
        };

        let name = match record.get("name") {
            Some(shapefile::dbase::FieldValue::Character(Some(s))) => Some(s.clone()),
            _ => None,
        };

        let geometry: MultiPolygon<f64> = match shape {
            shapefile::Shape::Polygon(polygon) => polygon
                .try_into()
                .map_err(|e| anyhow!("Failed to convert polygon: {:?}", e))?,
            shapefile::Shape::PolygonM(polygon) => polygon
                .try_into()
                .map_err(|e| anyhow!("Failed to convert polygonM: {:?}", e))?,
            shapefile::Shape::PolygonZ(polygon) => polygon
                .try_into()
                .map_err(|e| anyhow!("Failed to convert polygonZ: {:?}", e))?,
            _ => continue,
        };

        boundaries.push(Boundary {
            id,
            name,
            geometry: Geometry::new(geojson::Value::from(&geometry)),
        });
    }

    Ok(boundaries)
}

/// Boundary id from a dBase field. Negative, fractional or oversized
/// values are not ids.
fn shape_id(value: &shapefile::dbase::FieldValue) -> Option<u32> {
    match value {
        shapefile::dbase::FieldValue::Numeric(Some(n)) => {
            if n.fract() == 0.0 && *n >= 0.0 && *n <= u32::MAX as f64 {
                Some(*n as u32)
            } else {
                None
            }
        }
        shapefile::dbase::FieldValue::Integer(n) => u32::try_from(*n).ok(),
        shapefile::dbase::FieldValue::Character(Some(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Reads a GeoJSON FeatureCollection. The id comes from the `join_column`
/// property, falling back to the feature id.
pub fn read_geojson_boundaries<R: Read>(reader: R, join_column: &str) -> Result<Vec<Boundary>> {
    let geojson = GeoJson::from_reader(reader).context("Failed to parse GeoJSON")?;

    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err(anyhow!("GeoJSON must be a FeatureCollection")),
    };

    let mut boundaries = Vec::new();

    for feature in collection.features {
        let property = feature
            .properties
            .as_ref()
            .and_then(|props| props.get(join_column));

        let id = match (property, &feature.id) {
            (Some(serde_json::Value::Number(n)), _) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            (Some(serde_json::Value::String(s)), _) => s.trim().parse().ok(),
            (None, Some(geojson::feature::Id::Number(n))) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            (None, Some(geojson::feature::Id::String(s))) => s.trim().parse().ok(),
            _ => None,
        };
        let Some(id) = id else {
            continue;
        };

        let name = feature
            .properties
            .as_ref()
            .and_then(|props| props.get("name"))
            .and_then(|v| v.as_str())
            .map(str::to_string);

        match feature.geometry {
            Some(geometry) => boundaries.push(Boundary { id, name, geometry }),
            None => continue,
        }
    }

    Ok(boundaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgeSource;
    use crate::types::Indicator;

    fn input() -> InputConfig {
        InputConfig {
            data_csv: "unused.csv".into(),
            country_column: "country".to_string(),
            gender_column: "gender".to_string(),
            age: AgeSource::BirthYear {
                column: "yrbirth".to_string(),
                reference_year: 2017,
            },
            boundaries: None,
            join_column_shape: "id".to_string(),
        }
    }

    fn indicators() -> IndicatorSet {
        IndicatorSet::new(vec![Indicator {
            name: "use".to_string(),
            label: "computer use".to_string(),
            column: "use".to_string(),
            positive: "Yes".to_string(),
        }])
        .unwrap()
    }

    #[test]
    fn reads_rows_and_drops_missing_answers() {
        let csv = "\
,yrbirth,gender,country,use
0,1950,Male,Germany,Yes
1,1960.0,Female,Germany,NA
2,1945,Female,Denmark,No
";
        let dataset = read_dataset(csv.as_bytes(), &input(), &indicators()).unwrap();
        assert_eq!(dataset.len(), 3);

        let first = &dataset.respondents()[0];
        assert_eq!(first.age, 67);
        assert_eq!(first.gender, Gender::Male);
        assert_eq!(first.response("use"), Some("Yes"));

        assert_eq!(dataset.respondents()[1].age, 57);
        assert_eq!(dataset.respondents()[1].response("use"), None);
    }

    #[test]
    fn skips_unreadable_rows() {
        let csv = "\
yrbirth,gender,country,use
abc,Male,Germany,Yes
1950,Unknown,Germany,Yes
1950,Male,,Yes
1950,Male,Austria,Yes
";
        let dataset = read_dataset(csv.as_bytes(), &input(), &indicators()).unwrap();
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.respondents()[0].country, "Austria");
    }

    #[test]
    fn skips_birth_years_that_overflow() {
        let csv = "\
yrbirth,gender,country,use
-2147483000,Male,Germany,Yes
1e12,Female,Germany,Yes
1950,Male,Denmark,No
";
        let dataset = read_dataset(csv.as_bytes(), &input(), &indicators()).unwrap();
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.respondents()[0].country, "Denmark");
        assert_eq!(dataset.respondents()[0].age, 67);
    }

    #[test]
    fn shapefile_ids_must_be_whole_and_non_negative() {
        use shapefile::dbase::FieldValue;

        assert_eq!(shape_id(&FieldValue::Numeric(Some(276.0))), Some(276));
        assert_eq!(shape_id(&FieldValue::Numeric(Some(-3.0))), None);
        assert_eq!(shape_id(&FieldValue::Numeric(Some(27.5))), None);
        assert_eq!(shape_id(&FieldValue::Numeric(None)), None);
        assert_eq!(shape_id(&FieldValue::Integer(208)), Some(208));
        assert_eq!(shape_id(&FieldValue::Integer(-1)), None);
        assert_eq!(shape_id(&FieldValue::Character(Some(" 40 ".to_string()))), Some(40));
        assert_eq!(shape_id(&FieldValue::Character(Some("AT".to_string()))), None);
    }

    #[test]
    fn missing_column_is_an_error() {
        let csv = "yrbirth,gender,country\n1950,Male,Germany\n";
        let err = read_dataset(csv.as_bytes(), &input(), &indicators()).unwrap_err();
        assert!(err.to_string().contains("'use'"));
    }

    #[test]
    fn registry_rejects_duplicate_ids() {
        let result = CountryRegistry::new([("Germany", 276), ("Deutschland", 276)]);
        assert!(matches!(
            result,
            Err(PipelineError::DuplicateCountryId(_, _, 276))
        ));
    }

    #[test]
    fn registry_lookups() {
        let registry = CountryRegistry::new([("Germany", 276), ("Denmark", 208)]).unwrap();
        assert_eq!(registry.id_of("Denmark"), Some(208));
        assert_eq!(registry.id_of("Atlantis"), None);
        assert_eq!(registry.name_of(276), Some("Germany"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn reads_geojson_ids_from_properties_or_feature_id() {
        let json = r#"{
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": {"id": 276, "name": "Germany"},
                 "geometry": {"type": "Point", "coordinates": [10.0, 51.0]}},
                {"type": "Feature", "id": "208", "properties": {},
                 "geometry": {"type": "Point", "coordinates": [9.5, 56.0]}},
                {"type": "Feature", "properties": {"id": 4294967572},
                 "geometry": {"type": "Point", "coordinates": [1.0, 1.0]}},
                {"type": "Feature", "properties": {"name": "Nowhere"},
                 "geometry": {"type": "Point", "coordinates": [0.0, 0.0]}}
            ]
        }"#;
        let boundaries = read_geojson_boundaries(json.as_bytes(), "id").unwrap();
        assert_eq!(boundaries.len(), 2);
        assert_eq!(boundaries[0].id, 276);
        assert_eq!(boundaries[0].name.as_deref(), Some("Germany"));
        assert_eq!(boundaries[1].id, 208);
    }
}
