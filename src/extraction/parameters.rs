use std::collections::BTreeMap;

use log::{error, info};

use super::{
    bucket_covariates, CovariateSeries, CovariateValue, ParameterEvent, ParameterSetEvent,
    ParameterSetSeries,
};
use crate::error::{CoreError, CoreResult};
use crate::graph::OperableGraphManager;
use crate::model::ParameterDefinition;
use crate::time::Instant;

/// Extractor lifting a covariate series into parameter set events. The
/// time instants at which parameters are recomputed are fixed at
/// construction from the covariate events.
pub struct ParametersExtractor<'a> {
    buckets: BTreeMap<Instant, Vec<(String, f64)>>,
    parameters: &'a [ParameterDefinition],
}

impl<'a> ParametersExtractor<'a> {
    pub fn new(
        covariates: &CovariateSeries,
        parameters: &'a [ParameterDefinition],
        start: Instant,
        end: Instant,
    ) -> CoreResult<Self> {
        let buckets = bucket_covariates(covariates, start, end)?;
        Ok(Self {
            buckets,
            parameters,
        })
    }

    /// Emit the delta series: each event carries the parameters that
    /// changed at its instant (all of them at the first instant), plus the
    /// covariate values in effect.
    pub fn extract(&self) -> CoreResult<ParameterSetSeries> {
        let mut graph = OperableGraphManager::new();
        for definition in self.parameters {
            graph.register_input(format!("{}_population", definition.id), definition.value)?;
        }

        let mut series: ParameterSetSeries = Vec::new();
        let mut last_computed: BTreeMap<String, f64> = BTreeMap::new();
        let mut covariate_ids: Vec<String> = Vec::new();
        let mut first = true;

        for (&instant, bucket) in &self.buckets {
            let mut set_event = ParameterSetEvent {
                time: instant,
                parameters: Vec::new(),
                covariates: Vec::new(),
            };

            if first {
                for definition in self.parameters {
                    match &definition.operation {
                        Some(operation) => {
                            graph.register_operable(definition.id.clone(), operation.clone())?;
                        }
                        None => {
                            // Non-computed parameters go out verbatim.
                            set_event.parameters.push(ParameterEvent {
                                id: definition.id.clone(),
                                value: definition.value,
                            });
                        }
                    }
                }
                for (id, value) in bucket {
                    covariate_ids.push(id.clone());
                    graph.register_input(id.clone(), *value)?;
                }
            } else {
                for (id, value) in bucket {
                    graph.set_input(id, *value)?;
                }
            }

            if let Err(cause) = graph.evaluate() {
                error!("a priori computation of parameters failed: {}", cause);
                return Err(cause);
            }

            for definition in self.parameters {
                if definition.operation.is_none() {
                    continue;
                }
                let value = graph
                    .get_value(&definition.id)
                    .ok_or_else(|| CoreError::MissingInput(definition.id.clone()))?;
                if first || last_computed.get(&definition.id) != Some(&value) {
                    set_event.parameters.push(ParameterEvent {
                        id: definition.id.clone(),
                        value,
                    });
                    last_computed.insert(definition.id.clone(), value);
                }
            }

            for id in &covariate_ids {
                let value = graph
                    .get_value(id)
                    .ok_or_else(|| CoreError::MissingInput(id.clone()))?;
                set_event.covariates.push(CovariateValue {
                    id: id.clone(),
                    value,
                });
            }

            series.push(set_event);
            first = false;
        }

        info!("extracted {} parameter set events", series.len());
        Ok(series)
    }

    /// Expand a delta series: every event of the output restates the full
    /// parameter vector, folding the deltas forward.
    pub fn build_full_set(delta: &ParameterSetSeries) -> ParameterSetSeries {
        let Some(first) = delta.first() else {
            return Vec::new();
        };
        let mut current = first.clone();
        let mut full = vec![current.clone()];
        for event in &delta[1..] {
            current.time = event.time;
            for parameter in &event.parameters {
                match current
                    .parameters
                    .iter_mut()
                    .find(|existing| existing.id == parameter.id)
                {
                    Some(existing) => existing.value = parameter.value,
                    None => current.parameters.push(parameter.clone()),
                }
            }
            current.covariates = event.covariates.clone();
            full.push(current.clone());
        }
        full
    }

    /// Population-only extraction: a single event, valid since the
    /// beginning of time, with every parameter at its population value.
    pub fn extract_population(parameters: &[ParameterDefinition]) -> ParameterSetSeries {
        let events = parameters
            .iter()
            .map(|definition| ParameterEvent {
                id: definition.id.clone(),
                value: definition.value,
            })
            .collect();
        vec![ParameterSetEvent {
            time: Instant::MIN,
            parameters: events,
            covariates: Vec::new(),
        }]
    }
}
