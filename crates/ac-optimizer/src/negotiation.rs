//! Search-space negotiation with the optimizer.
//!
//! The client posts its declared space once, receives a refined space, and
//! merges it by identifier: bounds and literal options are replaced,
//! executable options the client already knows keep their callable and only
//! refresh their quality scores, and unknown executable options are hydrated
//! from the strategy registry.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use ac_types::{
    integer_bounds, real_bounds, AcResult, ExecutableOption, InboundExecutable,
    NegotiationError, PrepareRequest, PrepareResponse, ProtocolError, SearchSpace, Strategy,
    Value, ValueData, Variable, VariableKind, WireValue, WireVariable, VALUE_EXECUTABLE,
};

use crate::config::ClientConfig;
use crate::registry::StrategyRegistry;
use crate::session::{Application, Session};

/// Transport for the Prepare round trip.
#[async_trait]
pub trait Negotiator: Send + Sync {
    async fn prepare(&self, request: &PrepareRequest) -> AcResult<PrepareResponse>;
}

/// Prepare over HTTP/JSON. No request timeout is applied: the optimizer may
/// preprocess for arbitrarily long.
#[derive(Debug, Clone)]
pub struct HttpNegotiator {
    client: reqwest::Client,
    server_url: String,
}

impl HttpNegotiator {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            server_url: server_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.server_url())
    }

    pub fn endpoint(&self) -> String {
        format!("{}/apis/optimizations/prepares", self.server_url)
    }
}

#[async_trait]
impl Negotiator for HttpNegotiator {
    async fn prepare(&self, request: &PrepareRequest) -> AcResult<PrepareResponse> {
        let url = self.endpoint();
        let transport = |e: reqwest::Error| NegotiationError::Transport {
            url: url.clone(),
            message: e.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NegotiationError::Rejected {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let bytes = response.bytes().await.map_err(transport)?;
        serde_json::from_slice(&bytes).map_err(|e| {
            ProtocolError::Malformed {
                message: format!("prepare response: {e}"),
            }
            .into()
        })
    }
}

/// Counts of what a merge changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Local variables refined by the response.
    pub refined: usize,
    /// Variables only present in the response.
    pub added: usize,
    /// Local variables the response did not mention.
    pub untouched: usize,
    /// Executable options hydrated from the registry.
    pub hydrated: usize,
    /// Known executable options whose scores were refreshed.
    pub refreshed: usize,
}

/// Merge a refined space into `space` by identifier.
pub fn merge_refined(
    space: &mut SearchSpace,
    refined: &BTreeMap<String, WireVariable>,
    registry: &StrategyRegistry,
) -> AcResult<MergeReport> {
    let mut report = MergeReport {
        untouched: space.iter().filter(|v| !refined.contains_key(&v.id)).count(),
        ..MergeReport::default()
    };

    for (id, wire) in refined {
        let merged = match space.get(id) {
            Some(local) => {
                report.refined += 1;
                merge_variable(local, wire, registry, &mut report)?
            }
            None => {
                report.added += 1;
                let mut variable = Variable::from_wire_with(wire, |option| {
                    report.hydrated += 1;
                    hydrate(registry, option)
                })?;
                variable.id = id.clone();
                variable
            }
        };
        space.upsert(merged);
    }

    Ok(report)
}

fn merge_variable(
    local: &Variable,
    wire: &WireVariable,
    registry: &StrategyRegistry,
    report: &mut MergeReport,
) -> AcResult<Variable> {
    if local.type_tag() != wire.type_tag {
        return Err(ProtocolError::KindMismatch {
            id: local.id.clone(),
            declared: local.type_tag().to_string(),
            received: wire.type_tag.clone(),
        }
        .into());
    }

    let kind = match &local.kind {
        VariableKind::Binary => VariableKind::Binary,
        VariableKind::Integer { .. } if wire.bounds.is_some() => {
            let (lower, upper) = integer_bounds(wire)?;
            VariableKind::Integer { lower, upper }
        }
        VariableKind::Real { .. } if wire.bounds.is_some() => {
            let (lower, upper) = real_bounds(wire)?;
            VariableKind::Real { lower, upper }
        }
        VariableKind::Choice { options } if wire.options.is_some() => {
            let wire_options = wire.options.iter().flatten();
            VariableKind::Choice {
                options: merge_options(&local.id, options, wire_options, registry, report)?,
            }
        }
        unchanged => unchanged.clone(),
    };

    let name = wire
        .name
        .clone()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| local.name.clone());

    Ok(Variable {
        id: local.id.clone(),
        name,
        kind,
    })
}

fn merge_options<'a>(
    variable_id: &str,
    local: &BTreeMap<String, Value>,
    refined: impl Iterator<Item = (&'a String, &'a WireValue)>,
    registry: &StrategyRegistry,
    report: &mut MergeReport,
) -> AcResult<BTreeMap<String, Value>> {
    let mut merged = BTreeMap::new();

    for (option_id, option) in refined {
        let existing = local.get(option_id);
        let executable = option.type_tag == VALUE_EXECUTABLE;

        let data = match (existing, executable) {
            (Some(local_value), true) => match local_value.as_executable() {
                Some(known) => {
                    let inbound = InboundExecutable::from_data(option_id, &option.data)?;
                    report.refreshed += 1;
                    debug!(variable = %variable_id, option = %option_id, "refreshed option scores");
                    ValueData::Executable(known.clone().with_quality(inbound.quality))
                }
                None => return Err(option_mismatch(option_id, local_value, option)),
            },
            (Some(local_value), false) if local_value.as_executable().is_some() => {
                return Err(option_mismatch(option_id, local_value, option));
            }
            (None, true) => {
                report.hydrated += 1;
                ValueData::Executable(hydrate(registry, option)?)
            }
            (_, false) => Value::literal_from_wire(option)?.data,
        };

        merged.insert(
            option_id.clone(),
            Value {
                id: option_id.clone(),
                data,
            },
        );
    }

    Ok(merged)
}

fn option_mismatch(option_id: &str, local: &Value, received: &WireValue) -> ac_types::AcError {
    ProtocolError::KindMismatch {
        id: option_id.to_string(),
        declared: local.type_tag().to_string(),
        received: received.type_tag.clone(),
    }
    .into()
}

fn hydrate(registry: &StrategyRegistry, option: &WireValue) -> AcResult<ExecutableOption> {
    let inbound = InboundExecutable::from_data(&option.id, &option.data)?;
    registry.hydrate(&option.id, &inbound)
}

/// A declared search space that has not been negotiated yet.
///
/// `prepare` consumes the declaration, so each session negotiates exactly
/// once.
pub struct Optimization {
    config: ClientConfig,
    space: SearchSpace,
    registry: StrategyRegistry,
    application: Arc<dyn Application>,
}

impl Optimization {
    /// Declare the search space. Duplicate variable ids are rejected.
    pub fn new<A>(
        variables: impl IntoIterator<Item = Variable>,
        application: A,
        config: ClientConfig,
    ) -> AcResult<Self>
    where
        A: Application + 'static,
    {
        let space = SearchSpace::from_variables(variables)?;
        let registry = StrategyRegistry::from_space(&space)?;
        Ok(Self {
            config,
            space,
            registry,
            application: Arc::new(application),
        })
    }

    /// Make a strategy available for hydration without offering it locally.
    pub fn with_strategy(mut self, strategy: Strategy) -> AcResult<Self> {
        self.registry.register(strategy)?;
        Ok(self)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn search_space(&self) -> &SearchSpace {
        &self.space
    }

    pub fn prepare_request(&self) -> PrepareRequest {
        PrepareRequest {
            variables: self.space.to_wire(),
            host: self.config.client_host.clone(),
            port: self.config.client_port,
            name: self.config.client_name.clone(),
        }
    }

    /// Run the Prepare round trip and merge the refined space.
    pub async fn prepare<N>(self, negotiator: &N) -> AcResult<Session>
    where
        N: Negotiator + ?Sized,
    {
        let request = self.prepare_request();
        info!(
            variables = request.variables.len(),
            client = %self.config.client_name,
            "negotiating search space"
        );
        let response = negotiator.prepare(&request).await?;
        self.merge(&response)
    }

    /// Prepare against the optimizer named in the configuration.
    pub async fn prepare_http(self) -> AcResult<Session> {
        let negotiator = HttpNegotiator::from_config(&self.config);
        self.prepare(&negotiator).await
    }

    /// Merge an already-received response.
    pub fn merge(mut self, response: &PrepareResponse) -> AcResult<Session> {
        let report = merge_refined(&mut self.space, &response.variables, &self.registry)?;
        info!(
            refined = report.refined,
            added = report.added,
            untouched = report.untouched,
            hydrated = report.hydrated,
            refreshed = report.refreshed,
            "search space merged"
        );
        Ok(Session::new(self.config, self.space, self.application))
    }
}

impl std::fmt::Debug for Optimization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Optimization")
            .field("config", &self.config)
            .field("variables", &self.space.len())
            .field("strategies", &self.registry.len())
            .finish_non_exhaustive()
    }
}
