use crate::error::PipelineError;
use crate::filter::FilteredView;
use crate::types::{AggregateRow, IndicatorSet};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Default)]
struct CountryTally<'a> {
    answered: usize,
    categories: BTreeMap<&'a str, usize>,
}

/// Normalized crosstab of `indicator` per country, projected onto the
/// indicator's positive category.
///
/// Respondents with no answer count in neither numerator nor denominator.
/// Countries left with no answers are omitted. Rows come out in ascending
/// country order.
pub fn aggregate(
    view: &FilteredView<'_>,
    indicators: &IndicatorSet,
    indicator: &str,
) -> Result<Vec<AggregateRow>, PipelineError> {
    let indicator = indicators.get(indicator)?;

    let mut tallies: BTreeMap<&str, CountryTally> = BTreeMap::new();
    for respondent in view.records() {
        let Some(answer) = respondent.response(&indicator.name) else {
            continue;
        };
        let tally = tallies.entry(respondent.country.as_str()).or_default();
        tally.answered += 1;
        *tally.categories.entry(answer).or_default() += 1;
    }

    let rows: Vec<AggregateRow> = tallies
        .into_iter()
        .filter(|(_, tally)| tally.answered > 0)
        .map(|(country, tally)| {
            let total = tally.answered as f64;
            let distribution: BTreeMap<String, f64> = tally
                .categories
                .iter()
                .map(|(category, count)| (category.to_string(), *count as f64 / total))
                .collect();
            let positive = tally
                .categories
                .get(indicator.positive.as_str())
                .copied()
                .unwrap_or(0);
            AggregateRow {
                country: country.to_string(),
                respondents: tally.answered,
                percentage: positive as f64 / total,
                distribution,
            }
        })
        .collect();

    debug!(
        indicator = %indicator.name,
        respondents = view.len(),
        countries = rows.len(),
        "aggregated filtered view"
    );

    Ok(rows)
}
