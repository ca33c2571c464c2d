//! Result aggregation: de-duplicated endpoints, forms, and parameter sets
//! with a deterministic final ordering.

use crate::model::{Endpoint, Form, ParameterSet};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct AggregateState {
    endpoints: HashMap<(String, String), Endpoint>,
    forms: HashMap<(String, String, Vec<String>), Form>,
    parameters: HashMap<(String, String, Vec<String>), ParameterSet>,
}

#[derive(Debug, Default)]
pub struct Aggregator {
    state: Mutex<AggregateState>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges an endpoint into the collection. Duplicates union their
    /// sources, keep the minimum depth, and keep whatever status and
    /// content-type information exists.
    pub fn record_endpoint(&self, endpoint: Endpoint) {
        let key = endpoint.key();
        let mut state = self.state.lock().unwrap();
        match state.endpoints.get_mut(&key) {
            Some(existing) => {
                existing.depth = existing.depth.min(endpoint.depth);
                for source in endpoint.sources {
                    if !existing.sources.contains(&source) {
                        existing.sources.push(source);
                    }
                }
                existing.sources.sort();
                if existing.status.is_none() {
                    existing.status = endpoint.status;
                }
                if existing.content_type.is_none() {
                    existing.content_type = endpoint.content_type;
                }
            }
            None => {
                state.endpoints.insert(key, endpoint);
            }
        }
    }

    pub fn record_form(&self, form: Form) {
        let key = form.key();
        self.state.lock().unwrap().forms.entry(key).or_insert(form);
    }

    /// First sighting wins; later duplicates may add example values for
    /// parameters that had none.
    pub fn record_parameters(&self, set: ParameterSet) {
        let key = set.key();
        let mut state = self.state.lock().unwrap();
        match state.parameters.get_mut(&key) {
            Some(existing) => {
                for (name, value) in set.parameters {
                    let slot = existing.parameters.entry(name).or_default();
                    if slot.is_empty() && !value.is_empty() {
                        *slot = value;
                    }
                }
            }
            None => {
                state.parameters.insert(key, set);
            }
        }
    }

    pub fn endpoint_count(&self) -> usize {
        self.state.lock().unwrap().endpoints.len()
    }

    /// Snapshots the collections in their deterministic output order:
    /// endpoints by (depth, url), forms by (action, method), parameter
    /// sets by (url, method).
    pub fn finalise(&self) -> (Vec<Endpoint>, Vec<Form>, Vec<ParameterSet>) {
        let state = self.state.lock().unwrap();

        let mut endpoints: Vec<Endpoint> = state.endpoints.values().cloned().collect();
        endpoints.sort_by(|a, b| {
            a.depth
                .cmp(&b.depth)
                .then_with(|| a.url.cmp(&b.url))
                .then_with(|| a.method.cmp(&b.method))
        });

        let mut forms: Vec<Form> = state.forms.values().cloned().collect();
        forms.sort_by(|a, b| {
            a.action_url
                .cmp(&b.action_url)
                .then_with(|| a.method.cmp(&b.method))
        });

        let mut parameters: Vec<ParameterSet> = state.parameters.values().cloned().collect();
        parameters.sort_by(|a, b| {
            a.url
                .cmp(&b.url)
                .then_with(|| a.method.cmp(&b.method))
                .then_with(|| a.source.cmp(&b.source))
        });

        (endpoints, forms, parameters)
    }
}
