use std::collections::{BTreeMap, BTreeSet, HashSet};

use log::{debug, info};

use super::{CovariateEvent, CovariateSeries};
use crate::error::{CoreError, CoreResult};
use crate::graph::OperableGraphManager;
use crate::model::{CovariateCategory, CovariateDefinition, DataType, Interpolation};
use crate::time::{
    days_between, hours_between, months_between, to_seconds, weeks_between, years_between,
    Instant,
};
use crate::treatment::{IntakeEvent, PatientCovariate};
use crate::units;

/// A normalized observation: sorted, trimmed, unit-converted.
#[derive(Debug, Clone, Copy)]
struct Observation {
    time: Instant,
    value: f64,
}

/// Extractor turning covariate definitions and patient variates into a
/// chronologically ordered covariate series over `[start, end]`.
pub struct CovariateExtractor<'a> {
    definitions: &'a [CovariateDefinition],
    variates: &'a [PatientCovariate],
    start: Instant,
    end: Instant,
    treatment_start: Option<Instant>,
    birthdate: Option<Instant>,
}

impl<'a> CovariateExtractor<'a> {
    /// Validate the inputs and build an extractor. Fails on an inverted
    /// window, duplicate definitions, more than one covariate per age/time
    /// category, a negative age/time default, or a birth date that is
    /// unparseable or lies after `start` while an age covariate is defined.
    pub fn new(
        definitions: &'a [CovariateDefinition],
        variates: &'a [PatientCovariate],
        start: Instant,
        end: Instant,
    ) -> CoreResult<Self> {
        if start > end {
            return Err(CoreError::InvalidInput(format!(
                "invalid extraction window: {} is past {}",
                start, end
            )));
        }

        let mut seen_ids = BTreeSet::new();
        let mut seen_categories = HashSet::new();
        let mut has_age = false;
        for definition in definitions {
            if definition.id.trim().is_empty() {
                return Err(CoreError::InvalidInput(
                    "a covariate definition has no id".to_string(),
                ));
            }
            if !seen_ids.insert(definition.id.as_str()) {
                return Err(CoreError::InvalidInput(format!(
                    "duplicate covariate definition '{}'",
                    definition.id
                )));
            }
            let derived =
                definition.category.is_age() || definition.category.is_time_from_start();
            if derived {
                if !seen_categories.insert(definition.category) {
                    return Err(CoreError::InvalidInput(format!(
                        "more than one covariate with category {:?}",
                        definition.category
                    )));
                }
                if definition.default_numeric_value()? < 0.0 {
                    return Err(CoreError::InvalidInput(format!(
                        "covariate '{}' has a negative age/time default",
                        definition.id
                    )));
                }
                has_age |= definition.category.is_age();
            }
        }

        let mut birthdate = None;
        for variate in variates {
            if variate.is_birthdate() {
                let parsed = crate::model::parse_date(variate.value.trim()).ok_or_else(|| {
                    CoreError::InvalidInput(format!(
                        "cannot parse birth date '{}'",
                        variate.value
                    ))
                })?;
                if has_age && parsed > start {
                    return Err(CoreError::InvalidInput(format!(
                        "birth date {} lies after the extraction start {}",
                        parsed, start
                    )));
                }
                birthdate = Some(parsed);
                break;
            }
        }

        Ok(Self {
            definitions,
            variates,
            start,
            end,
            treatment_start: None,
            birthdate,
        })
    }

    /// Supply the treatment start (earliest intake), the reference instant
    /// for `TimeFromStartIn*` covariates.
    pub fn with_treatment_start(mut self, treatment_start: Instant) -> Self {
        self.treatment_start = Some(treatment_start);
        self
    }

    /// Turn an intake series into dose patient variates, for drug models
    /// that use the administered dose as a covariate.
    pub fn extract_dose_variates(
        intakes: &[IntakeEvent],
        definition: &CovariateDefinition,
    ) -> CoreResult<Vec<PatientCovariate>> {
        if definition.category != CovariateCategory::Dose {
            return Err(CoreError::InvalidInput(format!(
                "covariate '{}' is not a dose covariate",
                definition.id
            )));
        }
        let mut variates = Vec::with_capacity(intakes.len());
        for intake in intakes {
            let amount = units::convert(intake.amount, &intake.unit, &definition.unit)?;
            variates.push(PatientCovariate::new(
                definition.id.clone(),
                amount.to_string(),
                DataType::Double,
                definition.unit.clone(),
                intake.time,
            ));
        }
        Ok(variates)
    }

    /// Run the extraction. On failure no partial series is delivered.
    pub fn extract(&self) -> CoreResult<CovariateSeries> {
        info!(
            "extracting covariates: {} definitions, {} variates, window {} to {}",
            self.definitions.len(),
            self.variates.len(),
            self.start,
            self.end
        );

        let mut valued: BTreeMap<&str, &CovariateDefinition> = BTreeMap::new();
        let mut computed: BTreeMap<&str, &CovariateDefinition> = BTreeMap::new();
        for definition in self.definitions {
            if definition.is_computed() {
                computed.insert(definition.id.as_str(), definition);
            } else {
                valued.insert(definition.id.as_str(), definition);
            }
        }

        let observations = self.collect_observations(&valued)?;

        let mut series: CovariateSeries = Vec::new();
        let mut graph = OperableGraphManager::new();
        // Latest emitted value per valued covariate.
        let mut current: BTreeMap<String, f64> = BTreeMap::new();

        for (&id, &definition) in &valued {
            let initial = self.initial_value(definition, observations.get(id))?;
            series.push(CovariateEvent::new(id, self.start, initial));
            graph.register_input(id, initial)?;
            current.insert(id.to_string(), initial);
        }

        // Latest emitted value per computed covariate.
        let mut last_computed: BTreeMap<String, f64> = BTreeMap::new();
        for (&id, &definition) in &computed {
            let operation = definition
                .operation
                .clone()
                .ok_or_else(|| CoreError::InvalidInput(format!(
                    "covariate '{}' is not computed",
                    id
                )))?;
            graph.register_operable(id, operation)?;
        }
        if !computed.is_empty() {
            graph.evaluate()?;
            for &id in computed.keys() {
                let value = graph
                    .get_value(id)
                    .ok_or_else(|| CoreError::MissingInput(id.to_string()))?;
                series.push(CovariateEvent::new(id, self.start, value));
                last_computed.insert(id.to_string(), value);
            }
        }

        let refresh = self.collect_refresh_instants(&valued, &computed, &observations)?;

        for (&instant, ids) in &refresh {
            let mut valued_changed = false;
            for id in ids {
                let Some(&definition) = valued.get(id.as_str()) else {
                    continue;
                };
                let value = if definition.category.is_age()
                    || definition.category.is_time_from_start()
                {
                    self.derived_value(definition, instant)?
                } else {
                    match observations.get(id.as_str()) {
                        Some(observed) => {
                            sample_observations(observed, definition.interpolation, instant)?
                        }
                        None => continue,
                    }
                };
                let previous = current.get(id.as_str()).copied();
                if previous != Some(value) {
                    debug!("covariate '{}' becomes {} at {}", id, value, instant);
                    graph.set_input(id, value)?;
                    series.push(CovariateEvent::new(id.clone(), instant, value));
                    current.insert(id.clone(), value);
                    valued_changed = true;
                }
            }

            if !computed.is_empty() {
                graph.evaluate()?;
                for (&id, &definition) in &computed {
                    // Covariates computed on a refresh period only emit at
                    // their own ticks; the others follow any input change.
                    let eligible = match definition.refresh_period {
                        None => valued_changed,
                        Some(_) => ids.contains(id),
                    };
                    if !eligible {
                        continue;
                    }
                    let value = graph
                        .get_value(id)
                        .ok_or_else(|| CoreError::MissingInput(id.to_string()))?;
                    if last_computed.get(id) != Some(&value) {
                        series.push(CovariateEvent::new(id, instant, value));
                        last_computed.insert(id.to_string(), value);
                    }
                }
            }
        }

        info!("extracted {} covariate events", series.len());
        Ok(series)
    }

    /// Gather, sort, trim, and unit-convert the observations of each
    /// non-derived valued covariate.
    fn collect_observations(
        &self,
        valued: &BTreeMap<&str, &CovariateDefinition>,
    ) -> CoreResult<BTreeMap<String, Vec<Observation>>> {
        let mut observations: BTreeMap<String, Vec<Observation>> = BTreeMap::new();
        for variate in self.variates {
            let Some(&definition) = valued.get(variate.id.as_str()) else {
                // No matching definition: the variate is of no interest.
                continue;
            };
            if definition.category.is_age() || definition.category.is_time_from_start() {
                // Derived values come from the calendar, not from direct
                // measurements.
                continue;
            }
            let raw = variate.data_type.parse_value(&variate.value)?;
            let value = match variate.data_type {
                DataType::Int | DataType::Double => {
                    units::convert(raw, &variate.unit, &definition.unit)?
                }
                DataType::Bool | DataType::Date => raw,
            };
            observations
                .entry(variate.id.clone())
                .or_default()
                .push(Observation {
                    time: variate.event_time,
                    value,
                });
        }

        for (id, observed) in observations.iter_mut() {
            observed.sort_by(|a, b| a.time.cmp(&b.time));

            // Trim to the window, keeping one observation just before start
            // and at most one just past end to seed interpolation.
            let first_inside = observed.partition_point(|o| o.time < self.start);
            let keep_from = first_inside.saturating_sub(1);
            let first_past = observed.partition_point(|o| o.time <= self.end);
            let keep_to = observed.len().min(first_past + 1);
            *observed = observed[keep_from..keep_to].to_vec();

            let Some(&definition) = valued.get(id.as_str()) else {
                continue;
            };
            if definition.interpolation == Interpolation::Direct || observed.len() == 1 {
                // No interpolation ahead of the first measurement: relocate
                // it to the window start.
                observed[0].time = self.start;
            }
        }

        Ok(observations)
    }

    /// Value of a valued covariate at `start`.
    fn initial_value(
        &self,
        definition: &CovariateDefinition,
        observed: Option<&Vec<Observation>>,
    ) -> CoreResult<f64> {
        if definition.category.is_age() || definition.category.is_time_from_start() {
            return self.derived_value(definition, self.start);
        }
        match observed {
            None => definition.default_numeric_value(),
            Some(observed) => {
                if observed.len() == 1 || observed[0].time >= self.start {
                    Ok(observed[0].value)
                } else {
                    // One observation before start survived trimming; the
                    // next one is inside the window. Extrapolation is the
                    // caller's responsibility.
                    interpolate(
                        observed[0],
                        observed[1],
                        self.start,
                        definition.interpolation,
                    )
                }
            }
        }
    }

    /// Value of an age or time-from-start covariate at `instant`.
    fn derived_value(
        &self,
        definition: &CovariateDefinition,
        instant: Instant,
    ) -> CoreResult<f64> {
        let granular = |from: Instant, to: Instant| -> i64 {
            match definition.category {
                CovariateCategory::AgeInDays | CovariateCategory::TimeFromStartInDays => {
                    days_between(from, to)
                }
                CovariateCategory::AgeInWeeks | CovariateCategory::TimeFromStartInWeeks => {
                    weeks_between(from, to)
                }
                CovariateCategory::AgeInMonths | CovariateCategory::TimeFromStartInMonths => {
                    months_between(from, to)
                }
                CovariateCategory::AgeInYears | CovariateCategory::TimeFromStartInYears => {
                    years_between(from, to)
                }
                CovariateCategory::TimeFromStartInHours => hours_between(from, to),
                _ => 0,
            }
        };

        let reference = if definition.category.is_age() {
            self.birthdate
        } else {
            self.treatment_start
        };

        let value = match reference {
            Some(reference) => granular(reference, instant).max(0) as f64,
            None => definition.default_numeric_value()? + granular(self.start, instant) as f64,
        };
        Ok(value)
    }

    /// Collect the instants at which covariates are re-sampled, mapped to
    /// the covariates concerned. All instants lie in `(start, end]`.
    fn collect_refresh_instants(
        &self,
        valued: &BTreeMap<&str, &CovariateDefinition>,
        computed: &BTreeMap<&str, &CovariateDefinition>,
        observations: &BTreeMap<String, Vec<Observation>>,
    ) -> CoreResult<BTreeMap<Instant, BTreeSet<String>>> {
        let mut refresh: BTreeMap<Instant, BTreeSet<String>> = BTreeMap::new();

        for (&id, &definition) in valued {
            let derived =
                definition.category.is_age() || definition.category.is_time_from_start();
            if derived {
                let cadence = definition.category.cadence().ok_or_else(|| {
                    CoreError::InvalidInput(format!(
                        "covariate '{}' has no natural cadence",
                        id
                    ))
                })?;
                self.push_periodic_instants(id, cadence, &mut refresh)?;
            } else if let Some(period) = definition.refresh_period {
                self.push_periodic_instants(id, period, &mut refresh)?;
            } else if let Some(observed) = observations.get(id) {
                for observation in observed {
                    if observation.time > self.start && observation.time <= self.end {
                        refresh
                            .entry(observation.time)
                            .or_default()
                            .insert(id.to_string());
                    }
                }
            }
        }

        for (&id, &definition) in computed {
            if let Some(period) = definition.refresh_period {
                self.push_periodic_instants(id, period, &mut refresh)?;
            }
        }

        Ok(refresh)
    }

    /// Insert `start + k·period` for `k ≥ 1` while the instant stays at or
    /// before `end`.
    fn push_periodic_instants(
        &self,
        id: &str,
        period: crate::time::CalendarDuration,
        refresh: &mut BTreeMap<Instant, BTreeSet<String>>,
    ) -> CoreResult<()> {
        if !period.is_positive() {
            return Err(CoreError::InvalidInput(format!(
                "covariate '{}' has a non-positive refresh period",
                id
            )));
        }
        for k in 1u32.. {
            let Some(scaled) = period.scaled(k) else {
                break;
            };
            let Some(instant) = scaled.add_to(self.start) else {
                break;
            };
            if instant > self.end {
                break;
            }
            refresh.entry(instant).or_default().insert(id.to_string());
        }
        Ok(())
    }
}

/// Value of a covariate at `instant` from its observation list: hold the
/// first value before the first observation, hold the last past the last,
/// interpolate the bracketing pair otherwise. An observation landing
/// exactly on `instant` therefore wins over interpolation.
fn sample_observations(
    observed: &[Observation],
    interpolation: Interpolation,
    instant: Instant,
) -> CoreResult<f64> {
    if observed.is_empty() {
        return Err(CoreError::Interpolation(
            "no observation to sample from".to_string(),
        ));
    }
    if observed.len() == 1 || observed[0].time >= instant {
        return Ok(observed[0].value);
    }
    let after = observed.partition_point(|o| o.time <= instant);
    if after == observed.len() {
        Ok(observed[observed.len() - 1].value)
    } else {
        interpolate(observed[after - 1], observed[after], instant, interpolation)
    }
}

/// Interpolate between two observations at `target`. Extrapolation uses
/// the same straight line. Coincident observations must agree to within
/// 1e-6, otherwise the extraction fails.
fn interpolate(
    first: Observation,
    second: Observation,
    target: Instant,
    interpolation: Interpolation,
) -> CoreResult<f64> {
    if second.time < first.time {
        return Err(CoreError::Interpolation(format!(
            "observations out of order: {} is past {}",
            first.time, second.time
        )));
    }
    let t1 = to_seconds(first.time) as f64;
    let t2 = to_seconds(second.time) as f64;
    if (t1 - t2).abs() < 1e-6 {
        if (first.value - second.value).abs() < 1e-6 {
            return Ok(first.value);
        }
        return Err(CoreError::Interpolation(format!(
            "conflicting observations at {}: {} vs {}",
            first.time, first.value, second.value
        )));
    }
    let target_s = to_seconds(target) as f64;
    match interpolation {
        Interpolation::Direct => {
            if target_s < t2 {
                Ok(first.value)
            } else {
                Ok(second.value)
            }
        }
        Interpolation::Linear => {
            Ok(first.value + (second.value - first.value) * (target_s - t1) / (t2 - t1))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{InputSpec, InputType, Operation};
    use crate::units::Unit;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> Instant {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    fn special_operation() -> Operation {
        Operation::expression(
            "Weight * 0.5 + IsMale * 15",
            vec![
                InputSpec::new("Weight", InputType::Double),
                InputSpec::new("IsMale", InputType::Bool),
            ],
        )
    }

    fn base_definitions() -> Vec<CovariateDefinition> {
        vec![
            CovariateDefinition::new(
                "Gist",
                "false",
                CovariateCategory::Standard,
                DataType::Bool,
                Interpolation::Direct,
            ),
            CovariateDefinition::new(
                "Weight",
                "3.5",
                CovariateCategory::Standard,
                DataType::Double,
                Interpolation::Linear,
            )
            .with_unit(Unit::from("kg"))
            .with_refresh_period(crate::time::CalendarDuration::Days(1)),
            CovariateDefinition::new(
                "IsMale",
                "true",
                CovariateCategory::Standard,
                DataType::Bool,
                Interpolation::Direct,
            ),
            CovariateDefinition::new(
                "Special",
                "0",
                CovariateCategory::Standard,
                DataType::Double,
                Interpolation::Direct,
            )
            .with_operation(special_operation()),
        ]
    }

    fn variate(id: &str, value: &str, data_type: DataType, unit: &str, time: Instant) -> PatientCovariate {
        PatientCovariate::new(id, value, data_type, Unit::from(unit), time)
    }

    fn event_value(series: &CovariateSeries, id: &str, time: Instant) -> Option<f64> {
        series
            .iter()
            .find(|event| event.id == id && event.time == time)
            .map(|event| event.value)
    }

    fn assert_chronological(series: &CovariateSeries) {
        for pair in series.windows(2) {
            assert!(pair[0].time <= pair[1].time, "series is out of order");
        }
    }

    #[test]
    fn test_gist_flip_emits_five_events() {
        let definitions = base_definitions();
        let start = at(2017, 8, 12, 8, 0);
        let end = at(2017, 8, 17, 8, 0);
        let variates = vec![
            variate("Gist", "true", DataType::Bool, "", at(2017, 8, 13, 12, 32)),
            variate("Gist", "false", DataType::Bool, "", at(2017, 8, 13, 14, 32)),
        ];

        let extractor = CovariateExtractor::new(&definitions, &variates, start, end).unwrap();
        let series = extractor.extract().unwrap();

        assert_eq!(series.len(), 5);
        assert_chronological(&series);
        // First measure propagated back to the start of the interval.
        assert_relative_eq!(event_value(&series, "Gist", start).unwrap(), 1.0);
        // Second measure at the moment it was taken.
        assert_relative_eq!(
            event_value(&series, "Gist", at(2017, 8, 13, 14, 32)).unwrap(),
            0.0
        );
        assert_relative_eq!(event_value(&series, "Weight", start).unwrap(), 3.5);
        assert_relative_eq!(event_value(&series, "IsMale", start).unwrap(), 1.0);
        assert_relative_eq!(event_value(&series, "Special", start).unwrap(), 16.75);
    }

    #[test]
    fn test_no_variates_yields_defaults_only() {
        let definitions = base_definitions();
        let start = at(2017, 8, 12, 8, 0);
        let end = at(2017, 8, 17, 8, 0);

        let extractor = CovariateExtractor::new(&definitions, &[], start, end).unwrap();
        let series = extractor.extract().unwrap();

        assert_eq!(series.len(), 4);
        assert_relative_eq!(event_value(&series, "Gist", start).unwrap(), 0.0);
        assert_relative_eq!(event_value(&series, "Weight", start).unwrap(), 3.5);
        assert_relative_eq!(event_value(&series, "IsMale", start).unwrap(), 1.0);
        assert_relative_eq!(event_value(&series, "Special", start).unwrap(), 16.75);
    }

    #[test]
    fn test_linear_weight_ramp_with_daily_refresh() {
        let definitions = base_definitions();
        let start = at(2017, 8, 12, 8, 0);
        let end = at(2017, 8, 17, 8, 0);
        let variates = vec![
            variate("Gist", "true", DataType::Bool, "", at(2017, 8, 13, 12, 32)),
            variate("Weight", "3.8", DataType::Double, "kg", at(2017, 8, 13, 9, 0)),
            variate("Weight", "4.05", DataType::Double, "kg", at(2017, 8, 15, 21, 0)),
            variate("Weight", "4.25", DataType::Double, "kg", at(2017, 8, 16, 21, 0)),
        ];

        let extractor = CovariateExtractor::new(&definitions, &variates, start, end).unwrap();
        let series = extractor.extract().unwrap();

        assert_eq!(series.len(), 12);
        assert_chronological(&series);

        assert_relative_eq!(event_value(&series, "Gist", start).unwrap(), 1.0);
        assert_relative_eq!(event_value(&series, "IsMale", start).unwrap(), 1.0);

        // The first measure is past the window start, so the initial value
        // holds it back to the start; the daily refresh then samples the
        // interpolated ramp, and the last tick holds the final measure.
        let weight_expectations = [
            (start, 3.8),
            (at(2017, 8, 14, 8, 0), 3.895_833),
            (at(2017, 8, 15, 8, 0), 3.995_833),
            (at(2017, 8, 16, 8, 0), 4.141_667),
            (at(2017, 8, 17, 8, 0), 4.25),
        ];
        for (time, expected) in weight_expectations {
            assert_relative_eq!(
                event_value(&series, "Weight", time).unwrap(),
                expected,
                epsilon = 1e-5
            );
        }
        // No event on the unchanged first tick.
        assert!(event_value(&series, "Weight", at(2017, 8, 13, 8, 0)).is_none());
        // No event on the raw observation instants: the refresh period owns
        // the cadence.
        assert!(event_value(&series, "Weight", at(2017, 8, 15, 21, 0)).is_none());

        let special_expectations = [
            (start, 16.9),
            (at(2017, 8, 14, 8, 0), 16.947_917),
            (at(2017, 8, 15, 8, 0), 16.997_917),
            (at(2017, 8, 16, 8, 0), 17.070_833),
            (at(2017, 8, 17, 8, 0), 17.125),
        ];
        for (time, expected) in special_expectations {
            assert_relative_eq!(
                event_value(&series, "Special", time).unwrap(),
                expected,
                epsilon = 1e-5
            );
        }
    }

    #[test]
    fn test_every_definition_covers_start() {
        let definitions = base_definitions();
        let start = at(2017, 8, 12, 8, 0);
        let variates = vec![
            variate("Weight", "3.8", DataType::Double, "kg", at(2017, 8, 13, 9, 0)),
        ];
        let extractor =
            CovariateExtractor::new(&definitions, &variates, start, at(2017, 8, 17, 8, 0))
                .unwrap();
        let series = extractor.extract().unwrap();
        for definition in &definitions {
            let initial: Vec<_> = series
                .iter()
                .filter(|event| event.id == definition.id && event.time == start)
                .collect();
            assert_eq!(initial.len(), 1, "{} must cover start once", definition.id);
        }
    }

    #[test]
    fn test_unit_conversion_of_variate_value() {
        let definitions = vec![CovariateDefinition::new(
            "Weight",
            "3.5",
            CovariateCategory::Standard,
            DataType::Double,
            Interpolation::Linear,
        )
        .with_unit(Unit::from("kg"))];
        let start = at(2017, 8, 12, 8, 0);
        let variates = vec![variate(
            "Weight",
            "1000000",
            DataType::Double,
            "mg",
            at(2017, 8, 13, 9, 0),
        )];

        let extractor =
            CovariateExtractor::new(&definitions, &variates, start, at(2017, 8, 17, 8, 0))
                .unwrap();
        let series = extractor.extract().unwrap();
        assert_relative_eq!(event_value(&series, "Weight", start).unwrap(), 1.0);
    }

    #[test]
    fn test_incommensurable_variate_unit_fails() {
        let definitions = vec![CovariateDefinition::new(
            "Weight",
            "3.5",
            CovariateCategory::Standard,
            DataType::Double,
            Interpolation::Linear,
        )
        .with_unit(Unit::from("kg"))];
        let variates = vec![variate(
            "Weight",
            "3.5",
            DataType::Double,
            "l",
            at(2017, 8, 13, 9, 0),
        )];
        let extractor = CovariateExtractor::new(
            &definitions,
            &variates,
            at(2017, 8, 12, 8, 0),
            at(2017, 8, 17, 8, 0),
        )
        .unwrap();
        assert!(matches!(
            extractor.extract(),
            Err(CoreError::UnitMismatch { .. })
        ));
    }

    #[test]
    fn test_age_in_days_without_birthdate() {
        let definitions = vec![CovariateDefinition::new(
            "AgeDays",
            "20",
            CovariateCategory::AgeInDays,
            DataType::Int,
            Interpolation::Direct,
        )];
        let start = at(2017, 8, 12, 8, 0);
        // A window spanning 14 civil days (minus a few hours on the last
        // one) yields 14 events: the initial one plus 13 daily ticks.
        let end = at(2017, 8, 25, 20, 0);

        let extractor = CovariateExtractor::new(&definitions, &[], start, end).unwrap();
        let series = extractor.extract().unwrap();

        assert_eq!(series.len(), 14);
        for (k, event) in series.iter().enumerate() {
            assert_eq!(
                event.time,
                crate::time::CalendarDuration::Days(k as i64)
                    .add_to(start)
                    .unwrap()
            );
            assert_relative_eq!(event.value, 20.0 + k as f64);
        }
    }

    #[test]
    fn test_age_in_days_from_birthdate_is_monotone() {
        let definitions = vec![CovariateDefinition::new(
            "AgeDays",
            "0",
            CovariateCategory::AgeInDays,
            DataType::Int,
            Interpolation::Direct,
        )];
        let start = at(2017, 8, 12, 8, 0);
        let variates = vec![variate(
            "birthdate",
            "2017-08-05T08:00:00",
            DataType::Date,
            "",
            start,
        )];

        let extractor =
            CovariateExtractor::new(&definitions, &variates, start, at(2017, 8, 15, 8, 0))
                .unwrap();
        let series = extractor.extract().unwrap();

        assert_eq!(series.len(), 4);
        for (k, event) in series.iter().enumerate() {
            assert_relative_eq!(event.value, 7.0 + k as f64);
        }
        // Strictly increasing with step exactly one per civil day.
        for pair in series.windows(2) {
            assert_relative_eq!(pair[1].value - pair[0].value, 1.0);
            assert_eq!(days_between(pair[0].time, pair[1].time), 1);
        }
    }

    #[test]
    fn test_age_in_years_uses_civil_years() {
        let definitions = vec![CovariateDefinition::new(
            "Age",
            "0",
            CovariateCategory::AgeInYears,
            DataType::Int,
            Interpolation::Direct,
        )];
        let start = at(2017, 8, 12, 8, 0);
        let variates = vec![variate(
            "birthdate",
            "2016-08-20T08:00:00",
            DataType::Date,
            "",
            start,
        )];
        let extractor =
            CovariateExtractor::new(&definitions, &variates, start, at(2017, 8, 25, 8, 0))
                .unwrap();
        let series = extractor.extract().unwrap();
        // Not a full civil year yet, and the yearly cadence has no tick
        // inside the window.
        assert_relative_eq!(event_value(&series, "Age", start).unwrap(), 0.0);
        assert_eq!(series.len(), 1);
    }

    #[test]
    fn test_birthdate_after_start_fails() {
        let definitions = vec![CovariateDefinition::new(
            "AgeDays",
            "0",
            CovariateCategory::AgeInDays,
            DataType::Int,
            Interpolation::Direct,
        )];
        let start = at(2017, 8, 12, 8, 0);
        let variates = vec![variate(
            "birthdate",
            "2017-09-01T08:00:00",
            DataType::Date,
            "",
            start,
        )];
        assert!(
            CovariateExtractor::new(&definitions, &variates, start, at(2017, 8, 15, 8, 0))
                .is_err()
        );
    }

    #[test]
    fn test_time_from_start_with_treatment_start() {
        let definitions = vec![CovariateDefinition::new(
            "TreatmentDays",
            "0",
            CovariateCategory::TimeFromStartInDays,
            DataType::Int,
            Interpolation::Direct,
        )];
        let start = at(2017, 8, 12, 8, 0);
        let extractor = CovariateExtractor::new(&definitions, &[], start, at(2017, 8, 15, 8, 0))
            .unwrap()
            .with_treatment_start(at(2017, 8, 10, 8, 0));
        let series = extractor.extract().unwrap();

        assert_eq!(series.len(), 4);
        assert_relative_eq!(event_value(&series, "TreatmentDays", start).unwrap(), 2.0);
        assert_relative_eq!(
            event_value(&series, "TreatmentDays", at(2017, 8, 15, 8, 0)).unwrap(),
            5.0
        );
    }

    #[test]
    fn test_interpolation_midpoint_is_mean() {
        let first = Observation {
            time: at(2017, 8, 13, 8, 0),
            value: 3.0,
        };
        let second = Observation {
            time: at(2017, 8, 15, 8, 0),
            value: 5.0,
        };
        let midpoint = at(2017, 8, 14, 8, 0);
        assert_relative_eq!(
            interpolate(first, second, midpoint, Interpolation::Linear).unwrap(),
            4.0,
            epsilon = 1e-6
        );
        // Direct holds the first value until the second observation.
        assert_relative_eq!(
            interpolate(first, second, midpoint, Interpolation::Direct).unwrap(),
            3.0
        );
        assert_relative_eq!(
            interpolate(first, second, at(2017, 8, 15, 8, 0), Interpolation::Direct).unwrap(),
            5.0
        );
        // Extrapolation follows the same straight line.
        assert_relative_eq!(
            interpolate(first, second, at(2017, 8, 16, 8, 0), Interpolation::Linear).unwrap(),
            6.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_coincident_observations_must_agree() {
        let time = at(2017, 8, 13, 8, 0);
        let first = Observation { time, value: 3.0 };
        let same = Observation { time, value: 3.0 };
        let other = Observation { time, value: 4.0 };
        assert_relative_eq!(
            interpolate(first, same, time, Interpolation::Linear).unwrap(),
            3.0
        );
        assert!(interpolate(first, other, time, Interpolation::Linear).is_err());
        // Reversed observations are a failure as well.
        let earlier = Observation {
            time: at(2017, 8, 12, 8, 0),
            value: 1.0,
        };
        assert!(interpolate(first, earlier, time, Interpolation::Linear).is_err());
    }

    #[test]
    fn test_duplicate_definitions_fail() {
        let definitions = vec![
            CovariateDefinition::new(
                "Weight",
                "3.5",
                CovariateCategory::Standard,
                DataType::Double,
                Interpolation::Linear,
            ),
            CovariateDefinition::new(
                "Weight",
                "4.5",
                CovariateCategory::Standard,
                DataType::Double,
                Interpolation::Linear,
            ),
        ];
        assert!(CovariateExtractor::new(
            &definitions,
            &[],
            at(2017, 8, 12, 8, 0),
            at(2017, 8, 17, 8, 0)
        )
        .is_err());
    }

    #[test]
    fn test_inverted_window_fails() {
        let definitions = base_definitions();
        assert!(CovariateExtractor::new(
            &definitions,
            &[],
            at(2017, 8, 17, 8, 0),
            at(2017, 8, 12, 8, 0)
        )
        .is_err());
    }

    #[test]
    fn test_computed_covariate_with_unknown_input_fails() {
        let definitions = vec![CovariateDefinition::new(
            "Special",
            "0",
            CovariateCategory::Standard,
            DataType::Double,
            Interpolation::Direct,
        )
        .with_operation(Operation::expression(
            "Ghost * 2",
            vec![InputSpec::new("Ghost", InputType::Double)],
        ))];
        let extractor = CovariateExtractor::new(
            &definitions,
            &[],
            at(2017, 8, 12, 8, 0),
            at(2017, 8, 17, 8, 0),
        )
        .unwrap();
        assert!(matches!(
            extractor.extract(),
            Err(CoreError::MissingInput(_))
        ));
    }

    #[test]
    fn test_computed_covariate_with_refresh_period_emits_on_its_ticks() {
        let definitions = vec![
            CovariateDefinition::new(
                "Weight",
                "4",
                CovariateCategory::Standard,
                DataType::Double,
                Interpolation::Linear,
            )
            .with_unit(Unit::from("kg")),
            CovariateDefinition::new(
                "SpecialDaily",
                "0",
                CovariateCategory::Standard,
                DataType::Double,
                Interpolation::Direct,
            )
            .with_operation(Operation::expression(
                "Weight * 2",
                vec![InputSpec::new("Weight", InputType::Double)],
            ))
            .with_refresh_period(crate::time::CalendarDuration::Days(1)),
        ];
        let start = at(2017, 8, 12, 8, 0);
        let end = at(2017, 8, 15, 8, 0);
        let variates = vec![
            variate("Weight", "4", DataType::Double, "kg", at(2017, 8, 13, 0, 0)),
            variate("Weight", "8", DataType::Double, "kg", at(2017, 8, 15, 0, 0)),
        ];

        let extractor = CovariateExtractor::new(&definitions, &variates, start, end).unwrap();
        let series = extractor.extract().unwrap();
        assert_chronological(&series);

        // Weight emits at its own observation instants; the computed
        // covariate only at its daily ticks once its value changed.
        assert_eq!(series.len(), 4);
        assert_relative_eq!(event_value(&series, "Weight", start).unwrap(), 4.0);
        assert_relative_eq!(event_value(&series, "SpecialDaily", start).unwrap(), 8.0);
        assert_relative_eq!(
            event_value(&series, "Weight", at(2017, 8, 15, 0, 0)).unwrap(),
            8.0
        );

        // The ticks between the observations evaluate against Weight's
        // latest emitted value (still 4), not a fresh interpolation at the
        // tick instant, so nothing new is emitted there.
        assert!(event_value(&series, "SpecialDaily", at(2017, 8, 13, 8, 0)).is_none());
        assert!(event_value(&series, "SpecialDaily", at(2017, 8, 14, 8, 0)).is_none());
        // The Weight change at 15.08 00:00 does not trigger an off-tick
        // emission of the computed covariate.
        assert!(event_value(&series, "SpecialDaily", at(2017, 8, 15, 0, 0)).is_none());
        // The next tick picks the change up, doubled from the emitted 8.
        assert_relative_eq!(
            event_value(&series, "SpecialDaily", at(2017, 8, 15, 8, 0)).unwrap(),
            16.0
        );
    }

    #[test]
    fn test_dose_variates_from_intakes() {
        let definition = CovariateDefinition::new(
            "Dose",
            "0",
            CovariateCategory::Dose,
            DataType::Double,
            Interpolation::Direct,
        )
        .with_unit(Unit::from("mg"));
        let intakes = vec![
            IntakeEvent {
                time: at(2017, 8, 12, 8, 0),
                amount: 0.4,
                unit: Unit::from("g"),
            },
            IntakeEvent {
                time: at(2017, 8, 13, 8, 0),
                amount: 400.0,
                unit: Unit::from("mg"),
            },
        ];
        let variates =
            CovariateExtractor::extract_dose_variates(&intakes, &definition).unwrap();
        assert_eq!(variates.len(), 2);
        assert_eq!(variates[0].value, "400");
        assert_eq!(variates[1].value, "400");
        assert_eq!(variates[0].event_time, at(2017, 8, 12, 8, 0));
    }
}
