use crate::data::{Boundary, CountryRegistry};
use crate::error::Diagnostic;
use crate::types::{AggregateRow, GeoRow};
use geojson::Geometry;
use tracing::warn;

/// A boundary shape bound to zero or one aggregate rows. `row == None`
/// means "no data", which renders differently from 0%.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundFeature {
    pub id: u32,
    pub name: Option<String>,
    pub geometry: Geometry,
    pub row: Option<GeoRow>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoJoin {
    pub rows: Vec<GeoRow>,
    // Empty when the boundaries are referenced remotely by the document
    pub features: Vec<BoundFeature>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Attaches registry ids to aggregate rows. Rows whose country has no id
/// are dropped and reported; the rest are unaffected.
pub fn join(
    rows: &[AggregateRow],
    registry: &CountryRegistry,
    boundaries: Option<&[Boundary]>,
) -> GeoJoin {
    let mut joined = Vec::with_capacity(rows.len());
    let mut diagnostics = Vec::new();

    for row in rows {
        match registry.id_of(&row.country) {
            Some(id) => joined.push(GeoRow {
                country: row.country.clone(),
                id,
                percentage: row.percentage,
                respondents: row.respondents,
            }),
            None => {
                warn!(
                    country = %row.country,
                    respondents = row.respondents,
                    "country has no registry id, dropping from map"
                );
                diagnostics.push(Diagnostic::UnmappedCountry {
                    country: row.country.clone(),
                    respondents: row.respondents,
                });
            }
        }
    }

    let features = boundaries
        .unwrap_or_default()
        .iter()
        .map(|boundary| BoundFeature {
            id: boundary.id,
            name: boundary
                .name
                .clone()
                .or_else(|| registry.name_of(boundary.id).map(str::to_string)),
            geometry: boundary.geometry.clone(),
            row: joined.iter().find(|row| row.id == boundary.id).cloned(),
        })
        .collect();

    GeoJoin {
        rows: joined,
        features,
        diagnostics,
    }
}
